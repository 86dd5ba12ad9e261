// 该文件是 Kanjian （看见） 项目的一部分。
// src/server.rs - HTTP 服务公共部分
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
  Router,
  extract::Request,
  http::{StatusCode, header},
  middleware::{self, Next},
  response::{IntoResponse, Response},
};
use tokio::net::TcpListener;
use tracing::{Instrument, info, info_span, warn};

use crate::frame::FrameError;

/// 单帧请求体上限，摄像头帧通常超过框架默认的 2 MiB
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// 以 `image/jpeg` 返回图像字节
pub fn jpeg_response(body: impl Into<axum::body::Body>) -> Response {
  ([(header::CONTENT_TYPE, JPEG_CONTENT_TYPE)], body.into()).into_response()
}

/// 请求中没有可用的帧，无法回退到原图
pub fn bad_frame_response(err: FrameError) -> Response {
  warn!("无效请求: {}", err);
  (StatusCode::BAD_REQUEST, err.to_string()).into_response()
}

/// 为每个请求建立带有服务角色的 span，日志中据此区分两个服务
pub fn tag_requests(router: Router, role: &'static str) -> Router {
  router.layer(middleware::from_fn(move |request: Request, next: Next| {
    let span = info_span!(
      "request",
      role,
      method = %request.method(),
      path = %request.uri().path()
    );
    next.run(request).instrument(span)
  }))
}

pub async fn serve(bind: SocketAddr, router: Router) -> Result<()> {
  let listener = TcpListener::bind(bind)
    .await
    .with_context(|| format!("无法监听地址: {}", bind))?;
  info!("服务已启动，监听地址: {}", listener.local_addr()?);

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("服务异常退出")?;

  info!("服务已退出");
  Ok(())
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("收到中断信号，准备退出..."),
    Err(e) => {
      warn!("无法监听中断信号: {}", e);
      std::future::pending::<()>().await;
    }
  }
}
