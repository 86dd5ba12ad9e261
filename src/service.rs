// 该文件是 Kanjian （看见） 项目的一部分。
// src/service.rs - 检测服务
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

use std::sync::Arc;

use axum::{
  Router,
  extract::{DefaultBodyLimit, Multipart, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::post,
};
use thiserror::Error;
use tracing::{error, info};

use crate::{
  annotation::{Annotation, Marker},
  frame::{Frame, FrameError, encode_jpeg},
  model::Detector,
  render::{ErrorImageRenderer, error_text},
  server::{bad_frame_response, jpeg_response},
};

pub const DEFAULT_QUERY: &str = "glasses";

#[derive(Error, Debug)]
pub enum InferError {
  #[error(transparent)]
  Frame(#[from] FrameError),
  #[error("detection failed: {0}")]
  Detector(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 标注完成的图像
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
  pub jpeg: Vec<u8>,
  pub width: u32,
  pub height: u32,
  pub annotations: Vec<Annotation>,
}

/// 流水线失败时返回给调用方的内容：优先是带错误信息的占位图，
/// 连占位图都无法生成时只剩错误文本
#[derive(Debug, Clone)]
pub enum RenderedErrorImage {
  Placeholder { jpeg: Vec<u8>, message: String },
  Plain { message: String },
}

impl RenderedErrorImage {
  pub fn message(&self) -> &str {
    match self {
      RenderedErrorImage::Placeholder { message, .. } | RenderedErrorImage::Plain { message } => {
        message
      }
    }
  }
}

impl IntoResponse for AnnotatedImage {
  fn into_response(self) -> Response {
    jpeg_response(self.jpeg)
  }
}

impl IntoResponse for RenderedErrorImage {
  fn into_response(self) -> Response {
    match self {
      RenderedErrorImage::Placeholder { jpeg, .. } => jpeg_response(jpeg),
      RenderedErrorImage::Plain { message } => {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {message}")).into_response()
      }
    }
  }
}

pub struct DetectionService<D> {
  detector: D,
  queries: Vec<String>,
  marker: Marker,
  error_renderer: ErrorImageRenderer,
}

impl<D: Detector> DetectionService<D> {
  pub fn new(detector: D) -> Self {
    Self {
      detector,
      queries: vec![DEFAULT_QUERY.to_string()],
      marker: Marker::default(),
      error_renderer: ErrorImageRenderer::default(),
    }
  }

  pub fn with_queries(mut self, queries: Vec<String>) -> Self {
    self.queries = queries;
    self
  }

  pub fn with_marker(mut self, marker: Marker) -> Self {
    self.marker = marker;
    self
  }

  pub fn with_error_renderer(mut self, error_renderer: ErrorImageRenderer) -> Self {
    self.error_renderer = error_renderer;
    self
  }

  pub fn queries(&self) -> &[String] {
    &self.queries
  }

  /// 解码、检测、绘制标记并编码为 JPEG
  pub async fn annotate(&self, frame: &Frame) -> Result<AnnotatedImage, InferError> {
    let mut image = frame.decode_rgb()?;
    let (width, height) = image.dimensions();
    info!("图像尺寸: {}x{}", width, height);

    let annotations = self
      .detector
      .detect_objects(frame, &self.queries)
      .await
      .map_err(|e| InferError::Detector(Box::new(e)))?;
    info!("检测到 {} 个对象: {:?}", annotations.len(), annotations);

    self.marker.draw_markers(&mut image, &annotations);
    let jpeg = encode_jpeg(&image)?;

    Ok(AnnotatedImage {
      jpeg,
      width,
      height,
      annotations,
    })
  }

  /// 服务边界：失败被转换为占位图像，不向外抛出
  pub async fn infer(&self, frame: &Frame) -> Result<AnnotatedImage, RenderedErrorImage> {
    self
      .annotate(frame)
      .await
      .map_err(|err| self.render_failure(&err))
  }

  pub fn render_failure(&self, err: &InferError) -> RenderedErrorImage {
    let message = err.to_string();
    error!("推理出错: {}", message);

    match self.error_renderer.render_jpeg(&message) {
      Ok(jpeg) => {
        info!("返回错误图像: {}", error_text(&message));
        RenderedErrorImage::Placeholder { jpeg, message }
      }
      Err(render_err) => {
        error!("无法生成错误图像: {}", render_err);
        RenderedErrorImage::Plain { message }
      }
    }
  }
}

async fn infer_endpoint<D: Detector + 'static>(
  State(service): State<Arc<DetectionService<D>>>,
  mut multipart: Multipart,
) -> Response {
  let frame = match Frame::from_multipart(&mut multipart).await {
    Ok(frame) => frame,
    Err(err) => return bad_frame_response(err),
  };
  info!(
    "收到帧: {}, content_type: {}, {} 字节",
    frame.file_name().unwrap_or("<unnamed>"),
    frame.content_type().unwrap_or("<none>"),
    frame.len()
  );

  match service.infer(&frame).await {
    Ok(annotated) => {
      info!("返回处理后的图像: {} 字节", annotated.jpeg.len());
      annotated.into_response()
    }
    Err(failure) => failure.into_response(),
  }
}

/// `POST /infer`
pub fn router<D: Detector + 'static>(
  service: Arc<DetectionService<D>>,
  max_frame_bytes: usize,
) -> Router {
  Router::new()
    .route("/infer", post(infer_endpoint::<D>))
    .layer(DefaultBodyLimit::max(max_frame_bytes))
    .with_state(service)
}
