// 该文件是 Kanjian （看见） 项目的一部分。
// src/annotation.rs - 检测提示词、模型响应解析与标记绘制
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// 归一化坐标的取值上限
pub const NORMALIZED_RANGE: f64 = 1000.0;
pub const DEFAULT_BOX_HALF_SIZE: u32 = 60;

const MARKER_COLOR: [u8; 3] = [0, 255, 100]; // 绿色
const MARKER_STROKE: u32 = 4;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 20;
const DEFAULT_LABEL: &str = "object";
const CODE_FENCE: &str = "```";

fn default_label() -> String {
  DEFAULT_LABEL.to_string()
}

/// 模型返回的单个检测点
///
/// `point` 为 `[y, x]`（先行后列），归一化到 0-1000。该顺序由模型约定，不能交换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
  pub point: [f32; 2],
  #[serde(default = "default_label")]
  pub label: String,
}

impl Annotation {
  pub fn new(y_norm: f32, x_norm: f32, label: impl Into<String>) -> Self {
    Self {
      point: [y_norm, x_norm],
      label: label.into(),
    }
  }

  pub fn y_norm(&self) -> f32 {
    self.point[0]
  }

  pub fn x_norm(&self) -> f32 {
    self.point[1]
  }

  /// 反归一化为像素坐标 (x, y)，向零截断
  pub fn to_pixel(&self, width: u32, height: u32) -> (i64, i64) {
    let x = (self.x_norm() as f64 * width as f64 / NORMALIZED_RANGE) as i64;
    let y = (self.y_norm() as f64 * height as f64 / NORMALIZED_RANGE) as i64;
    (x, y)
  }
}

/// 构造检测提示词。输出格式是下游解析的契约，修改措辞时必须保持 JSON 结构不变。
pub fn build_detection_prompt<S: AsRef<str>>(queries: &[S]) -> String {
  let objects = queries
    .iter()
    .map(AsRef::as_ref)
    .collect::<Vec<_>>()
    .join(", ");

  format!(
    "Get all points matching the following objects: {objects}. The \
     label returned should be an identifying name for the object detected.\n\
     The answer should follow the json format:\n\
     [{{\"point\": [y, x], \"label\": \"helmet\"}}, ...]. The points are in \
     [y, x] format normalized to 0-1000.\n\
     If no objects are detected, return an empty array []."
  )
}

/// 解析模型的文本响应。任何解析失败都退化为空列表，不返回错误。
pub fn parse_model_response(raw: &str) -> Vec<Annotation> {
  let text = strip_code_fence(raw.trim());

  if let Ok(value) = serde_json::from_str::<Value>(text)
    && let Some(annotations) = annotations_from_value(value)
  {
    return annotations;
  }

  debug!("直接解析失败，尝试提取第一个 JSON 数组");
  let extracted = first_json_array(text)
    .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
    .and_then(annotations_from_value);

  match extracted {
    Some(annotations) => annotations,
    None => {
      warn!("无法解析模型响应，按无检测结果处理: {:?}", truncate(raw, 200));
      Vec::new()
    }
  }
}

fn annotations_from_value(value: Value) -> Option<Vec<Annotation>> {
  let Value::Array(items) = value else {
    return None;
  };

  let annotations = items
    .into_iter()
    .filter_map(|item| match serde_json::from_value::<Annotation>(item.clone()) {
      Ok(annotation) => Some(annotation),
      Err(e) => {
        warn!("跳过无效的检测项 {}: {}", item, e);
        None
      }
    })
    .collect();

  Some(annotations)
}

/// 去掉 ``` 代码块标记以及可选的语言标签
fn strip_code_fence(text: &str) -> &str {
  let Some(rest) = text.strip_prefix(CODE_FENCE) else {
    return text;
  };

  let body = match rest.find(CODE_FENCE) {
    Some(end) => &rest[..end],
    None => rest,
  };

  let tag_len = body
    .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')))
    .unwrap_or(body.len());

  body[tag_len..].trim()
}

/// 查找第一个括号配平的 `[...]` 子串，跳过字符串字面量中的括号
fn first_json_array(text: &str) -> Option<&str> {
  let start = text.find('[')?;
  let mut depth = 0usize;
  let mut in_string = false;
  let mut escaped = false;

  for (offset, c) in text[start..].char_indices() {
    if in_string {
      match c {
        _ if escaped => escaped = false,
        '\\' => escaped = true,
        '"' => in_string = false,
        _ => {}
      }
      continue;
    }

    match c {
      '"' => in_string = true,
      '[' => depth += 1,
      ']' => {
        depth -= 1;
        if depth == 0 {
          return Some(&text[start..=start + offset]);
        }
      }
      _ => {}
    }
  }

  None
}

fn truncate(text: &str, max_chars: usize) -> String {
  text.chars().take(max_chars).collect()
}

/// 标记框像素范围（闭区间），已裁剪到图像边界
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerRect {
  pub x_min: u32,
  pub y_min: u32,
  pub x_max: u32,
  pub y_max: u32,
}

/// 计算以检测点为中心、半边长为 `half_size` 的方框，坐标不会小于 0 或超过图像尺寸
pub fn marker_rect(annotation: &Annotation, width: u32, height: u32, half_size: u32) -> MarkerRect {
  let (x, y) = annotation.to_pixel(width, height);
  let half = half_size as i64;
  let (w, h) = (width as i64, height as i64);

  MarkerRect {
    x_min: (x - half).clamp(0, w) as u32,
    y_min: (y - half).clamp(0, h) as u32,
    x_max: (x + half).clamp(0, w) as u32,
    y_max: (y + half).clamp(0, h) as u32,
  }
}

/// 标记绘制器
pub struct Marker {
  half_size: u32,
  stroke: u32,
  color: Rgb<u8>,
  label_font: Option<FontArc>,
  font_scale: PxScale,
}

impl Default for Marker {
  fn default() -> Self {
    Self {
      half_size: DEFAULT_BOX_HALF_SIZE,
      stroke: MARKER_STROKE,
      color: Rgb(MARKER_COLOR),
      label_font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }
}

impl Marker {
  pub fn with_half_size(mut self, half_size: u32) -> Self {
    self.half_size = half_size;
    self
  }

  pub fn with_stroke(mut self, stroke: u32) -> Self {
    self.stroke = stroke;
    self
  }

  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = Rgb(color);
    self
  }

  /// 设置字体后会在方框上方写出标签
  pub fn with_label_font(mut self, font: Option<FontArc>) -> Self {
    self.label_font = font;
    self
  }

  pub fn half_size(&self) -> u32 {
    self.half_size
  }

  pub fn draw_markers(&self, image: &mut RgbImage, annotations: &[Annotation]) {
    let (width, height) = image.dimensions();

    for annotation in annotations {
      let rect = marker_rect(annotation, width, height, self.half_size);
      debug!("绘制标记 {} {:?}: {:?}", annotation.label, annotation.point, rect);
      self.draw_rect(image, rect);

      if let Some(font) = &self.label_font {
        let label_y = (rect.y_min as i32 - LABEL_OFFSET).max(0);
        draw_text_mut(
          image,
          self.color,
          rect.x_min as i32,
          label_y,
          self.font_scale,
          font,
          &annotation.label,
        );
      }
    }
  }

  // 边框向内加粗
  fn draw_rect(&self, image: &mut RgbImage, rect: MarkerRect) {
    for thickness in 0..self.stroke {
      let x_min = rect.x_min + thickness;
      let y_min = rect.y_min + thickness;
      let Some(x_max) = rect.x_max.checked_sub(thickness) else {
        break;
      };
      let Some(y_max) = rect.y_max.checked_sub(thickness) else {
        break;
      };

      if x_min > x_max || y_min > y_max {
        break;
      }

      let outline = Rect::at(x_min as i32, y_min as i32).of_size(x_max - x_min + 1, y_max - y_min + 1);
      draw_hollow_rect_mut(image, outline, self.color);
    }
  }
}

/// 使用默认颜色与线宽在图像上绘制所有标记
pub fn draw_markers(image: &mut RgbImage, annotations: &[Annotation], half_size: u32) {
  Marker::default()
    .with_half_size(half_size)
    .draw_markers(image, annotations);
}
