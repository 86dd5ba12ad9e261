// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/edge_relay.rs - 边缘转发服务入口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  relay::{self, DEFAULT_DOWNSTREAM_URL, EdgeRelay},
  server::{self, DEFAULT_MAX_FRAME_BYTES},
};

/// 边缘转发服务：接收浏览器上传的帧并转发到检测服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, default_value = "0.0.0.0:5002", value_name = "ADDR")]
  pub bind: SocketAddr,
  /// 检测服务的推理接口地址
  #[arg(long, default_value = DEFAULT_DOWNSTREAM_URL, value_name = "URL")]
  pub downstream: Url,
  /// 转发超时（秒）
  #[arg(long, default_value = "30", value_name = "SECONDS")]
  pub timeout: u64,
  /// 单帧请求体上限（字节）
  #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES, value_name = "BYTES")]
  pub max_frame_bytes: usize,
  /// 日志文件，日志同时输出到终端
  #[arg(long, default_value = "main_server.log", value_name = "FILE")]
  pub log_file: PathBuf,
  /// 只输出到终端，不写日志文件
  #[arg(long)]
  pub no_log_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  kanjian::logging::init((!args.no_log_file).then_some(args.log_file.as_path()))?;

  info!("边缘转发服务启动于 {}", chrono::Local::now().to_rfc3339());
  info!("检测服务地址: {}", args.downstream);
  info!("转发超时: {} 秒", args.timeout);

  let relay = EdgeRelay::new(args.downstream, Duration::from_secs(args.timeout))?;
  let router = server::tag_requests(
    relay::router(Arc::new(relay), args.max_frame_bytes),
    "main",
  );

  server::serve(args.bind, router).await
}
