// 该文件是 Kanjian （看见） 项目的一部分。
// src/render.rs - 字体加载与错误占位图像
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use thiserror::Error;
use tracing::info;

use crate::frame::{FrameError, encode_jpeg};

pub const ERROR_IMAGE_WIDTH: u32 = 640;
pub const ERROR_IMAGE_HEIGHT: u32 = 480;
/// 错误信息写入图像时保留的最大字符数
pub const ERROR_MESSAGE_MAX_CHARS: usize = 100;

const ERROR_TEXT_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const ERROR_TEXT_ORIGIN: (i32, i32) = (10, 10);
const ERROR_FONT_SIZE: f32 = 16.0;

// 编译期嵌入的默认字体，`--font` 可覆盖
const DEFAULT_FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum FontError {
  #[error("cannot read font file {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid font file {path}: {source}")]
  Invalid {
    path: PathBuf,
    #[source]
    source: ab_glyph::InvalidFont,
  },
}

pub fn load_font(path: &Path) -> Result<FontArc, FontError> {
  let data = std::fs::read(path).map_err(|source| FontError::Io {
    path: path.to_path_buf(),
    source,
  })?;

  FontArc::try_from_vec(data).map_err(|source| FontError::Invalid {
    path: path.to_path_buf(),
    source,
  })
}

/// 内置的 DejaVu Sans 字体
pub fn default_font() -> FontArc {
  FontArc::try_from_slice(DEFAULT_FONT_DATA).expect("无法加载内置字体")
}

/// 指定了路径则必须加载成功，否则使用内置字体
pub fn find_font(explicit: Option<&Path>) -> Result<FontArc, FontError> {
  match explicit {
    Some(path) => {
      let font = load_font(path)?;
      info!("已加载字体: {}", path.display());
      Ok(font)
    }
    None => {
      info!("使用内置字体");
      Ok(default_font())
    }
  }
}

/// 写入图像的错误文本，只保留前 100 个字符
pub fn error_text(message: &str) -> String {
  let truncated: String = message.chars().take(ERROR_MESSAGE_MAX_CHARS).collect();
  format!("Error: {truncated}")
}

/// 生成 640x480 黑色占位图像，并在左上角写出错误信息
#[derive(Clone)]
pub struct ErrorImageRenderer {
  font: FontArc,
  scale: PxScale,
}

impl Default for ErrorImageRenderer {
  fn default() -> Self {
    Self::new(default_font())
  }
}

impl ErrorImageRenderer {
  pub fn new(font: FontArc) -> Self {
    Self {
      font,
      scale: PxScale::from(ERROR_FONT_SIZE),
    }
  }

  pub fn render(&self, message: &str) -> RgbImage {
    let mut image = RgbImage::new(ERROR_IMAGE_WIDTH, ERROR_IMAGE_HEIGHT);
    let (x, y) = ERROR_TEXT_ORIGIN;
    draw_text_mut(
      &mut image,
      Rgb(ERROR_TEXT_COLOR),
      x,
      y,
      self.scale,
      &self.font,
      &error_text(message),
    );
    image
  }

  pub fn render_jpeg(&self, message: &str) -> Result<Vec<u8>, FrameError> {
    encode_jpeg(&self.render(message))
  }
}
