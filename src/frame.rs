// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 帧定义与编解码
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

#[cfg(any(feature = "edge_relay", feature = "detection_service"))]
use axum::extract::Multipart;
use bytes::Bytes;
use image::{DynamicImage, RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::{debug, info};

/// 上传帧所在的 multipart 字段名
pub const FRAME_FIELD: &str = "frame";
/// 无法确定类型时使用的 MIME 类型
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";
/// JPEG 编码质量
pub const JPEG_QUALITY: u8 = 75;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("cannot decode image: {0}")]
  Decode(#[source] image::ImageError),
  #[error("cannot encode jpeg: {0}")]
  Encode(#[source] image::ImageError),
  #[error("multipart error: {0}")]
  Multipart(String),
  #[error("missing multipart field '{0}'")]
  MissingField(&'static str),
}

/// 客户端上传的一帧图像（原始编码字节 + 声明的内容类型）
#[derive(Debug, Clone)]
pub struct Frame {
  data: Bytes,
  content_type: Option<String>,
  file_name: Option<String>,
}

impl Frame {
  pub fn new(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
    Self {
      data: data.into(),
      content_type,
      file_name: None,
    }
  }

  pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
    self.file_name = file_name;
    self
  }

  /// 从 multipart 请求体中读取 `frame` 字段，其余字段忽略
  #[cfg(any(feature = "edge_relay", feature = "detection_service"))]
  pub async fn from_multipart(multipart: &mut Multipart) -> Result<Self, FrameError> {
    while let Some(field) = multipart
      .next_field()
      .await
      .map_err(|e| FrameError::Multipart(e.to_string()))?
    {
      if field.name() != Some(FRAME_FIELD) {
        debug!("忽略 multipart 字段: {:?}", field.name());
        continue;
      }

      let content_type = field.content_type().map(str::to_owned);
      let file_name = field.file_name().map(str::to_owned);
      let data = field
        .bytes()
        .await
        .map_err(|e| FrameError::Multipart(e.to_string()))?;

      return Ok(Frame::new(data, content_type).with_file_name(file_name));
    }

    Err(FrameError::MissingField(FRAME_FIELD))
  }

  pub fn data(&self) -> &Bytes {
    &self.data
  }

  pub fn into_data(self) -> Bytes {
    self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn content_type(&self) -> Option<&str> {
    self.content_type.as_deref()
  }

  pub fn file_name(&self) -> Option<&str> {
    self.file_name.as_deref()
  }

  /// 传给模型的 MIME 类型：优先按内容识别（转发时声明的类型固定为 JPEG，不一定准确），
  /// 其次使用声明的 image/* 类型，最后回退到 JPEG
  pub fn mime_type(&self) -> String {
    if let Ok(format) = image::guess_format(&self.data) {
      let sniffed = format.to_mime_type();
      if let Some(declared) = self.content_type()
        && declared != sniffed
      {
        debug!("声明类型 {} 与内容 {} 不一致，以内容为准", declared, sniffed);
      }
      return sniffed.to_string();
    }

    match self.content_type() {
      Some(declared) if declared.starts_with("image/") => declared.to_string(),
      _ => DEFAULT_MIME_TYPE.to_string(),
    }
  }

  /// 解码并统一为 3 通道 RGB
  pub fn decode_rgb(&self) -> Result<RgbImage, FrameError> {
    let image = image::load_from_memory(&self.data).map_err(FrameError::Decode)?;
    Ok(into_rgb(image))
  }
}

/// JPEG 编码器不支持所有颜色模式（调色板、带 alpha 等），统一转换为 RGB8
pub fn into_rgb(image: DynamicImage) -> RgbImage {
  match image {
    DynamicImage::ImageRgb8(rgb) => rgb,
    other => {
      info!("转换颜色模式: {:?} -> Rgb8", other.color());
      other.to_rgb8()
    }
  }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, FrameError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
    .encode_image(image)
    .map_err(FrameError::Encode)?;
  Ok(buffer)
}
