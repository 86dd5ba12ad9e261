// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/gemini.rs - Gemini 多模态模型
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

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DEFAULT_TEMPERATURE, DEFAULT_THINKING_BUDGET, GenerateRequest, TextModel},
};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-robotics-er-1.5-preview";
pub const DEFAULT_GEMINI_TIMEOUT: Duration = Duration::from_secs(60);

const GEMINI_SCHEME: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Error, Debug)]
pub enum GeminiError {
  #[error("model url must use the 'gemini' scheme, found '{0}'")]
  SchemeMismatch(String),
  #[error("model id is empty")]
  MissingModelId,
  #[error("invalid model parameter {0}={1}")]
  InvalidParameter(String, String),
  #[error("missing API key")]
  MissingApiKey,
  #[error("invalid API endpoint: {0}")]
  Endpoint(#[from] url::ParseError),
  #[error("model request timed out")]
  Timeout(#[source] reqwest::Error),
  #[error("cannot reach model API: {0}")]
  Unreachable(#[source] reqwest::Error),
  #[error("model request failed: {0}")]
  Http(#[source] reqwest::Error),
  #[error("model API returned {0}: {1}")]
  Status(reqwest::StatusCode, String),
  #[error("model returned no text")]
  EmptyResponse,
}

impl From<reqwest::Error> for GeminiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      GeminiError::Timeout(err)
    } else if err.is_connect() {
      GeminiError::Unreachable(err)
    } else {
      GeminiError::Http(err)
    }
  }
}

/// 由 `gemini:<model-id>?temperature=0.3&thinking_budget=0&timeout=60` 形式的 URL 构造
#[derive(Debug, Clone)]
pub struct GeminiBuilder {
  model_id: String,
  api_key: Option<String>,
  endpoint: String,
  temperature: f32,
  thinking_budget: u32,
  timeout: Duration,
}

impl Default for GeminiBuilder {
  fn default() -> Self {
    Self {
      model_id: DEFAULT_GEMINI_MODEL.to_string(),
      api_key: None,
      endpoint: GEMINI_API_BASE.to_string(),
      temperature: DEFAULT_TEMPERATURE,
      thinking_budget: DEFAULT_THINKING_BUDGET,
      timeout: DEFAULT_GEMINI_TIMEOUT,
    }
  }
}

impl FromUrlWithScheme for GeminiBuilder {
  const SCHEME: &'static str = GEMINI_SCHEME;
}

impl FromUrl for GeminiBuilder {
  type Error = GeminiError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GeminiError::SchemeMismatch(url.scheme().to_string()));
    }

    let model_id = url.path().trim_matches('/');
    if model_id.is_empty() {
      return Err(GeminiError::MissingModelId);
    }

    let mut builder = GeminiBuilder {
      model_id: model_id.to_string(),
      ..Default::default()
    };

    for (name, value) in url.query_pairs() {
      let invalid = || GeminiError::InvalidParameter(name.to_string(), value.to_string());
      match name.as_ref() {
        "temperature" => builder.temperature = value.parse().map_err(|_| invalid())?,
        "thinking_budget" => builder.thinking_budget = value.parse().map_err(|_| invalid())?,
        "timeout" => {
          let secs: u64 = value.parse().map_err(|_| invalid())?;
          builder.timeout = Duration::from_secs(secs);
        }
        _ => warn!("忽略未知的模型参数: {}={}", name, value),
      }
    }

    Ok(builder)
  }
}

impl GeminiBuilder {
  pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
    self.api_key = Some(api_key.into());
    self
  }

  /// API 根地址，测试时可指向本地服务
  pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
    self.endpoint = endpoint.into();
    self
  }

  pub fn temperature(mut self, temperature: f32) -> Self {
    self.temperature = temperature;
    self
  }

  pub fn thinking_budget(mut self, thinking_budget: u32) -> Self {
    self.thinking_budget = thinking_budget;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn model_id(&self) -> &str {
    &self.model_id
  }

  pub fn build(self) -> Result<GeminiModel, GeminiError> {
    let api_key = self
      .api_key
      .filter(|key| !key.trim().is_empty())
      .ok_or(GeminiError::MissingApiKey)?;

    let url = Url::parse(&format!(
      "{}/v1beta/models/{}:generateContent",
      self.endpoint.trim_end_matches('/'),
      self.model_id
    ))?;

    let client = reqwest::Client::builder()
      .timeout(self.timeout)
      .build()
      .map_err(GeminiError::Http)?;

    info!(
      "模型已配置: {} (temperature={}, thinking_budget={}, timeout={:?})",
      self.model_id, self.temperature, self.thinking_budget, self.timeout
    );

    Ok(GeminiModel {
      client,
      url,
      api_key,
      model_id: self.model_id,
      generation_config: GenerationConfig {
        temperature: self.temperature,
        thinking_config: ThinkingConfig {
          thinking_budget: self.thinking_budget,
        },
      },
    })
  }
}

pub struct GeminiModel {
  client: reqwest::Client,
  url: Url,
  api_key: String,
  model_id: String,
  generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
  contents: Vec<Content<'a>>,
  generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
struct Content<'a> {
  parts: Vec<Part<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Part<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  inline_data: Option<Blob<'a>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  text: Option<&'a str>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Blob<'a> {
  mime_type: &'a str,
  data: String,
}

#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  temperature: f32,
  thinking_config: ThinkingConfig,
}

#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
  thinking_budget: u32,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
  content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
  #[serde(default)]
  parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
  text: Option<String>,
  #[serde(default)]
  thought: bool,
}

impl GenerateContentResponse {
  // 拼接第一个候选中的非思考文本；只有空白的文本同样返回，由解析器按无检测结果处理
  fn text(&self) -> Option<String> {
    let content = self.candidates.first()?.content.as_ref()?;
    let mut texts = content
      .parts
      .iter()
      .filter(|part| !part.thought)
      .filter_map(|part| part.text.as_deref())
      .peekable();

    texts.peek()?;
    Some(texts.collect())
  }
}

impl GeminiModel {
  fn request_body<'a>(&self, request: &GenerateRequest<'a>) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
      contents: vec![Content {
        parts: vec![
          Part {
            inline_data: Some(Blob {
              mime_type: request.mime_type,
              data: STANDARD.encode(request.image),
            }),
            text: None,
          },
          Part {
            inline_data: None,
            text: Some(request.prompt),
          },
        ],
      }],
      generation_config: self.generation_config,
    }
  }
}

#[async_trait]
impl TextModel for GeminiModel {
  type Error = GeminiError;

  fn model_id(&self) -> &str {
    &self.model_id
  }

  async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, Self::Error> {
    let body = self.request_body(&request);
    debug!("请求模型 API: {}", self.url);

    let response = self
      .client
      .post(self.url.clone())
      .header(API_KEY_HEADER, &self.api_key)
      .json(&body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let text = response.text().await.unwrap_or_default();
      return Err(GeminiError::Status(status, text));
    }

    let reply: GenerateContentResponse = response.json().await?;
    reply.text().ok_or(GeminiError::EmptyResponse)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn parse(url: &str) -> Result<GeminiBuilder, GeminiError> {
    GeminiBuilder::from_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn url_selects_model_and_defaults() {
    let builder = parse("gemini:gemini-robotics-er-1.5-preview").unwrap();
    assert_eq!(builder.model_id(), DEFAULT_GEMINI_MODEL);
    assert_eq!(builder.temperature, DEFAULT_TEMPERATURE);
    assert_eq!(builder.thinking_budget, DEFAULT_THINKING_BUDGET);
    assert_eq!(builder.timeout, DEFAULT_GEMINI_TIMEOUT);
  }

  #[test]
  fn url_query_overrides_generation_parameters() {
    let builder = parse("gemini:some-model?temperature=0.7&thinking_budget=128&timeout=5").unwrap();
    assert_eq!(builder.model_id(), "some-model");
    assert_eq!(builder.temperature, 0.7);
    assert_eq!(builder.thinking_budget, 128);
    assert_eq!(builder.timeout, Duration::from_secs(5));
  }

  #[test]
  fn url_errors() {
    assert!(matches!(parse("openai:gpt-4o"), Err(GeminiError::SchemeMismatch(s)) if s == "openai"));
    assert!(matches!(parse("gemini:"), Err(GeminiError::MissingModelId)));
    assert!(matches!(
      parse("gemini:m?temperature=warm"),
      Err(GeminiError::InvalidParameter(name, _)) if name == "temperature"
    ));
  }

  #[test]
  fn build_requires_api_key() {
    assert!(matches!(
      GeminiBuilder::default().build(),
      Err(GeminiError::MissingApiKey)
    ));
    assert!(matches!(
      GeminiBuilder::default().api_key("  ").build(),
      Err(GeminiError::MissingApiKey)
    ));
  }

  #[test]
  fn request_body_matches_generate_content_shape() {
    let model = GeminiBuilder::default().api_key("key").build().unwrap();
    assert_eq!(
      model.url.as_str(),
      "https://generativelanguage.googleapis.com/v1beta/models/gemini-robotics-er-1.5-preview:generateContent"
    );

    let body = model.request_body(&GenerateRequest {
      image: b"abc",
      mime_type: "image/png",
      prompt: "find things",
    });

    assert_eq!(
      serde_json::to_value(&body).unwrap(),
      json!({
        "contents": [{
          "parts": [
            { "inlineData": { "mimeType": "image/png", "data": "YWJj" } },
            { "text": "find things" }
          ]
        }],
        "generationConfig": {
          "temperature": 0.3f32,
          "thinkingConfig": { "thinkingBudget": 0 }
        }
      })
    );
  }

  #[test]
  fn response_text_skips_thoughts() {
    let reply: GenerateContentResponse = serde_json::from_value(json!({
      "candidates": [{
        "content": {
          "parts": [
            { "text": "thinking...", "thought": true },
            { "text": "```json\n[]" },
            { "text": "\n```" }
          ]
        }
      }]
    }))
    .unwrap();
    assert_eq!(reply.text().as_deref(), Some("```json\n[]\n```"));

    let empty: GenerateContentResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
    assert!(empty.text().is_none());
  }

  #[test]
  fn blank_text_is_kept_but_missing_text_is_not() {
    let blank: GenerateContentResponse = serde_json::from_value(json!({
      "candidates": [{ "content": { "parts": [{ "text": "  \n " }] } }]
    }))
    .unwrap();
    assert_eq!(blank.text().as_deref(), Some("  \n "));

    let thoughts_only: GenerateContentResponse = serde_json::from_value(json!({
      "candidates": [{ "content": { "parts": [{ "text": "hmm", "thought": true }] } }]
    }))
    .unwrap();
    assert!(thoughts_only.text().is_none());

    let no_content: GenerateContentResponse =
      serde_json::from_value(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).unwrap();
    assert!(no_content.text().is_none());
  }
}
