// 该文件是 Kanjian （看见） 项目的一部分。
// src/relay.rs - 边缘转发服务
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

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  extract::{DefaultBodyLimit, Multipart, State},
  response::Response,
  routing::post,
};
use bytes::Bytes;
use reqwest::{
  StatusCode,
  multipart::{Form, Part},
};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use url::Url;

use crate::{
  frame::{FRAME_FIELD, Frame},
  server::{JPEG_CONTENT_TYPE, bad_frame_response, jpeg_response},
};

pub const DEFAULT_DOWNSTREAM_URL: &str = "http://localhost:5001/infer";
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

const FORWARD_FILE_NAME: &str = "frame.jpg";

#[derive(Error, Debug)]
pub enum RelayError {
  #[error("detection service timed out")]
  UpstreamTimeout(#[source] reqwest::Error),
  #[error("cannot connect to detection service: {0}")]
  UpstreamUnreachable(#[source] reqwest::Error),
  #[error("detection service returned {0}: {1}")]
  UpstreamStatus(StatusCode, String),
  #[error("relay request failed: {0}")]
  Unknown(#[source] reqwest::Error),
}

impl From<reqwest::Error> for RelayError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      RelayError::UpstreamTimeout(err)
    } else if err.is_connect() {
      RelayError::UpstreamUnreachable(err)
    } else {
      RelayError::Unknown(err)
    }
  }
}

/// 把帧转发到检测服务；任何失败都回退为原始帧，不重试
pub struct EdgeRelay {
  client: reqwest::Client,
  downstream: Url,
}

impl EdgeRelay {
  pub fn new(downstream: Url, timeout: Duration) -> Result<Self, RelayError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(RelayError::Unknown)?;

    Ok(Self { client, downstream })
  }

  pub fn downstream(&self) -> &Url {
    &self.downstream
  }

  /// 单次转发，只有 HTTP 200 视为成功
  pub async fn forward(&self, frame: &Frame) -> Result<Bytes, RelayError> {
    let part = Part::bytes(frame.data().to_vec())
      .file_name(FORWARD_FILE_NAME)
      .mime_str(JPEG_CONTENT_TYPE)?;
    let form = Form::new().part(FRAME_FIELD, part);

    info!("转发到检测服务: {}", self.downstream);
    let response = self
      .client
      .post(self.downstream.clone())
      .multipart(form)
      .send()
      .await?;

    let status = response.status();
    info!("检测服务响应状态: {}", status);
    if status != StatusCode::OK {
      let body = response.text().await.unwrap_or_default();
      return Err(RelayError::UpstreamStatus(status, body));
    }

    Ok(response.bytes().await?)
  }

  /// 转发并返回结果图像，失败时返回原始帧字节
  pub async fn relay(&self, frame: Frame) -> Bytes {
    match self.forward(&frame).await {
      Ok(body) => {
        info!("检测服务返回 {} 字节", body.len());
        body
      }
      Err(err) => {
        match &err {
          RelayError::UpstreamTimeout(_) => error!("检测服务超时"),
          RelayError::UpstreamUnreachable(_) => error!(
            "无法连接检测服务 {}，请确认其是否已启动: {}",
            self.downstream, err
          ),
          RelayError::UpstreamStatus(status, body) => {
            error!("检测服务错误: {} - {}", status, body)
          }
          RelayError::Unknown(_) => error!("转发失败: {}", err),
        }
        info!("返回原始帧 ({} 字节)", frame.len());
        frame.into_data()
      }
    }
  }
}

async fn receive_frame(State(relay): State<Arc<EdgeRelay>>, mut multipart: Multipart) -> Response {
  let frame = match Frame::from_multipart(&mut multipart).await {
    Ok(frame) => frame,
    Err(err) => return bad_frame_response(err),
  };
  info!(
    "收到浏览器帧: {}, {} 字节",
    frame.file_name().unwrap_or("<unnamed>"),
    frame.len()
  );

  jpeg_response(relay.relay(frame).await)
}

/// `POST /frames`，允许任意来源跨域访问
pub fn router(relay: Arc<EdgeRelay>, max_frame_bytes: usize) -> Router {
  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods(Any)
    .allow_headers(Any);

  Router::new()
    .route("/frames", post(receive_frame))
    .layer(DefaultBodyLimit::max(max_frame_bytes))
    .layer(cors)
    .with_state(relay)
}
