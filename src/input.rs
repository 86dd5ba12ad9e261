// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 图像文件输入
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

use std::path::Path;

use image::ImageFormat;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI scheme mismatch: expected 'image', found '{0}'")]
  SchemaMismatch(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 读取单个图像文件作为一帧，例如 `image:///data/imgs/img.png`
pub struct ImageFileInput {
  frame: Option<Frame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch(url.scheme().to_string()));
    }

    let path = Path::new(url.path());
    let data = std::fs::read(path)?;
    info!("读取图像文件: {} ({} 字节)", path.display(), data.len());

    // 内容类型按扩展名推断，无法识别时交给 Frame 按内容判断
    let content_type = ImageFormat::from_path(path)
      .ok()
      .map(|format| format.to_mime_type().to_string());
    let file_name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned());

    Ok(ImageFileInput {
      frame: Some(Frame::new(data, content_type).with_file_name(file_name)),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}
