// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 检测模型接口
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

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
  annotation::{Annotation, build_detection_prompt, parse_model_response},
  frame::Frame,
};

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_THINKING_BUDGET: u32 = 0;

/// 一次多模态生成请求；模型 ID、温度与思考预算属于模型自身的配置
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
  pub image: &'a [u8],
  pub mime_type: &'a str,
  pub prompt: &'a str,
}

/// 接收图像与提示词、返回自由文本的生成式模型
#[async_trait]
pub trait TextModel: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn model_id(&self) -> &str;

  async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, Self::Error>;
}

/// 目标检测接口：给定一帧和查询列表，返回检测点
#[async_trait]
pub trait Detector: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  async fn detect_objects(
    &self,
    frame: &Frame,
    queries: &[String],
  ) -> Result<Vec<Annotation>, Self::Error>;
}

/// 通过提示词驱动生成式模型完成检测，响应由 [`parse_model_response`] 宽松解析
pub struct PromptDetector<M> {
  model: M,
}

impl<M: TextModel> PromptDetector<M> {
  pub fn new(model: M) -> Self {
    Self { model }
  }

  pub fn model(&self) -> &M {
    &self.model
  }
}

#[async_trait]
impl<M: TextModel> Detector for PromptDetector<M> {
  type Error = M::Error;

  async fn detect_objects(
    &self,
    frame: &Frame,
    queries: &[String],
  ) -> Result<Vec<Annotation>, Self::Error> {
    let prompt = build_detection_prompt(queries);
    let mime_type = frame.mime_type();

    info!(
      "调用模型 {} 检测: {:?} ({} 字节, {})",
      self.model.model_id(),
      queries,
      frame.len(),
      mime_type
    );
    let now = std::time::Instant::now();
    let text = self
      .model
      .generate(GenerateRequest {
        image: &frame.data()[..],
        mime_type: &mime_type,
        prompt: &prompt,
      })
      .await?;
    info!("模型响应完成，耗时: {:.2?}", now.elapsed());
    debug!("模型原始响应: {}", text);

    Ok(parse_model_response(&text))
  }
}

#[cfg(feature = "model_gemini")]
mod gemini;
#[cfg(feature = "model_gemini")]
pub use self::gemini::{
  DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_TIMEOUT, GEMINI_API_BASE, GeminiBuilder, GeminiError,
  GeminiModel,
};

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[derive(Debug, thiserror::Error)]
  #[error("offline")]
  struct Offline;

  struct CannedModel {
    reply: Result<&'static str, ()>,
    seen: Mutex<Vec<(String, String, usize)>>,
  }

  impl CannedModel {
    fn replying(reply: &'static str) -> Self {
      Self {
        reply: Ok(reply),
        seen: Mutex::new(Vec::new()),
      }
    }
  }

  #[async_trait]
  impl TextModel for CannedModel {
    type Error = Offline;

    fn model_id(&self) -> &str {
      "canned"
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, Self::Error> {
      self.seen.lock().unwrap().push((
        request.mime_type.to_string(),
        request.prompt.to_string(),
        request.image.len(),
      ));
      self.reply.map(str::to_string).map_err(|_| Offline)
    }
  }

  #[tokio::test]
  async fn prompt_detector_parses_fenced_reply() {
    let detector = PromptDetector::new(CannedModel::replying(
      "```json\n[{\"point\": [100, 900], \"label\": \"glasses\"}]\n```",
    ));
    let frame = Frame::new(&b"jpeg bytes"[..], Some("image/jpeg".into()));

    let annotations = detector
      .detect_objects(&frame, &["glasses".to_string()])
      .await
      .unwrap();
    assert_eq!(annotations, vec![Annotation::new(100.0, 900.0, "glasses")]);

    let seen = detector.model().seen.lock().unwrap();
    let (mime_type, prompt, len) = &seen[0];
    assert_eq!(mime_type, "image/jpeg");
    assert!(prompt.contains("following objects: glasses."));
    assert_eq!(*len, 10);
  }

  #[tokio::test]
  async fn malformed_reply_is_no_detection() {
    let detector = PromptDetector::new(CannedModel::replying("I could not find anything, sorry"));
    let frame = Frame::new(&b"x"[..], None);
    let annotations = detector.detect_objects(&frame, &[]).await.unwrap();
    assert!(annotations.is_empty());
  }

  #[tokio::test]
  async fn model_errors_propagate() {
    let detector = PromptDetector::new(CannedModel {
      reply: Err(()),
      seen: Mutex::new(Vec::new()),
    });
    let frame = Frame::new(&b"x"[..], None);
    assert!(detector.detect_objects(&frame, &[]).await.is_err());
  }
}
