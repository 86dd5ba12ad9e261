// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/annotate_oneshot.rs - 单张图像检测与标注
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  FromUrl,
  annotation::{DEFAULT_BOX_HALF_SIZE, Marker},
  input::ImageFileInput,
  model::{Detector, GeminiBuilder, PromptDetector},
  output::{Render, SaveImageFileOutput},
};

/// 对单张图像运行检测并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型 URL
  #[arg(long, default_value = "gemini:gemini-robotics-er-1.5-preview", value_name = "MODEL")]
  pub model: Url,
  /// 模型 API 密钥
  #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, value_name = "KEY")]
  pub api_key: String,
  /// 输入图像，例如 image:///data/imgs/img.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出图像，例如 image:///data/annotated_output.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 检测目标，可重复指定
  #[arg(long = "query", required = true, value_name = "LABEL")]
  pub queries: Vec<String>,
  /// 标记框半边长（像素）
  #[arg(long, default_value_t = DEFAULT_BOX_HALF_SIZE, value_name = "PIXELS")]
  pub box_half_size: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
  kanjian::logging::init(None)?;

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = ImageFileInput::from_url(&args.input)?;
  let detector = PromptDetector::new(
    GeminiBuilder::from_url(&args.model)?
      .api_key(args.api_key)
      .build()?,
  );
  let output = SaveImageFileOutput::from_url(&args.output)?
    .with_marker(Marker::default().with_half_size(args.box_half_size));

  info!("开始推理...");
  let now = std::time::Instant::now();
  for frame in input {
    let annotations = detector.detect_objects(&frame, &args.queries).await?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    info!("检测到 {} 个对象", annotations.len());
    for annotation in &annotations {
      info!("  - {}: {:?}", annotation.label, annotation.point);
    }
    output.render_result(&frame, &annotations)?;
  }

  Ok(())
}
