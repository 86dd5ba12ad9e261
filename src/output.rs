// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 保存标注结果到图像文件
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

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  annotation::{Annotation, Marker},
  frame::{Frame, FrameError},
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 在帧上绘制标记后保存，格式由扩展名决定，例如 `image:///tmp/annotated_output.png`
pub struct SaveImageFileOutput {
  path: PathBuf,
  marker: Marker,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      marker: Marker::default(),
    })
  }
}

impl SaveImageFileOutput {
  pub fn with_marker(mut self, marker: Marker) -> Self {
    self.marker = marker;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Render<Frame, Vec<Annotation>> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Frame, result: &Vec<Annotation>) -> Result<(), Self::Error> {
    let mut image = frame.decode_rgb()?;
    self.marker.draw_markers(&mut image, result);

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("标注图像已保存: {}", self.path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{DynamicImage, ImageFormat, RgbImage};
  use std::io::Cursor;

  #[test]
  fn saves_annotated_frame() {
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(200, 100))
      .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
      .unwrap();
    let frame = Frame::new(png, Some("image/png".into()));

    let dir = std::env::temp_dir().join(format!("kanjian-output-{}", std::process::id()));
    let path = dir.join("nested").join("annotated.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();

    let output = SaveImageFileOutput::from_url(&url).unwrap();
    output
      .render_result(&frame, &vec![Annotation::new(500.0, 500.0, "x")])
      .unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (200, 100));
    // x=100, y=50, 半边长 60 -> 左边框在 x=40
    assert_eq!(saved.get_pixel(40, 50).0, [0, 255, 100]);

    std::fs::remove_dir_all(dir).unwrap();
  }
}
