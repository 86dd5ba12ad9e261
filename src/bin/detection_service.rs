// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/detection_service.rs - 检测服务入口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  FromUrl,
  annotation::{DEFAULT_BOX_HALF_SIZE, Marker},
  model::{GeminiBuilder, PromptDetector},
  render::{ErrorImageRenderer, find_font},
  server::{self, DEFAULT_MAX_FRAME_BYTES},
  service::{self, DEFAULT_QUERY, DetectionService},
};

/// 检测服务：调用多模态模型检测目标并在图像上绘制标记
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, default_value = "0.0.0.0:5001", value_name = "ADDR")]
  pub bind: SocketAddr,
  /// 模型 URL，例如 gemini:gemini-robotics-er-1.5-preview?temperature=0.3&thinking_budget=0&timeout=60
  #[arg(long, default_value = "gemini:gemini-robotics-er-1.5-preview", value_name = "MODEL")]
  pub model: Url,
  /// 模型 API 密钥
  #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, value_name = "KEY")]
  pub api_key: String,
  /// 检测目标，可重复指定
  #[arg(long = "query", default_value = DEFAULT_QUERY, value_name = "LABEL")]
  pub queries: Vec<String>,
  /// 标记框半边长（像素）
  #[arg(long, default_value_t = DEFAULT_BOX_HALF_SIZE, value_name = "PIXELS")]
  pub box_half_size: u32,
  /// 字体文件（TTF/OTF），用于错误图像与标签；未指定时使用内置字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 在标记框上方绘制标签
  #[arg(long)]
  pub draw_labels: bool,
  /// 单帧请求体上限（字节）
  #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES, value_name = "BYTES")]
  pub max_frame_bytes: usize,
  /// 日志文件，日志同时输出到终端
  #[arg(long, default_value = "ai_server.log", value_name = "FILE")]
  pub log_file: PathBuf,
  /// 只输出到终端，不写日志文件
  #[arg(long)]
  pub no_log_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  kanjian::logging::init((!args.no_log_file).then_some(args.log_file.as_path()))?;

  info!("检测服务启动于 {}", chrono::Local::now().to_rfc3339());
  info!("使用模型: {}", args.model);
  info!("检测目标: {:?}", args.queries);

  let model = GeminiBuilder::from_url(&args.model)
    .with_context(|| format!("无效的模型 URL: {}", args.model))?
    .api_key(args.api_key)
    .build()?;

  let font = find_font(args.font.as_deref())?;
  let marker = Marker::default()
    .with_half_size(args.box_half_size)
    .with_label_font(args.draw_labels.then(|| font.clone()));

  let service = DetectionService::new(PromptDetector::new(model))
    .with_queries(args.queries)
    .with_marker(marker)
    .with_error_renderer(ErrorImageRenderer::new(font));

  let router = server::tag_requests(
    service::router(Arc::new(service), args.max_frame_bytes),
    "ai",
  );

  server::serve(args.bind, router).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let args = Args::parse_from(["detection-service", "--api-key", "k"]);
    assert_eq!(args.bind, "0.0.0.0:5001".parse::<SocketAddr>().unwrap());
    assert_eq!(args.queries, vec![DEFAULT_QUERY.to_string()]);
    assert_eq!(args.box_half_size, DEFAULT_BOX_HALF_SIZE);
    assert_eq!(args.log_file, PathBuf::from("ai_server.log"));
    assert!(!args.no_log_file);
  }

  #[test]
  fn queries_repeat() {
    let args = Args::parse_from([
      "detection-service",
      "--api-key",
      "k",
      "--query",
      "cup",
      "--query",
      "phone",
    ]);
    assert_eq!(args.queries, vec!["cup".to_string(), "phone".to_string()]);
  }
}
