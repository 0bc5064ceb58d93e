//! Language-model provider abstraction and implementations.
//!
//! Defines the [`LanguageModel`] trait with batch and streaming generation,
//! and two backends:
//! - **[`OllamaLlm`]** — `POST {base_url}/api/generate`, NDJSON streaming.
//! - **[`OpenAiLlm`]** — `POST /v1/chat/completions`, SSE streaming.
//!
//! A token stream is lazy, finite, and non-restartable: tokens are yielded
//! in generation order and dropping the stream abandons the underlying
//! HTTP response, which stops further token requests.

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Lazy sequence of generated text tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Trait for language-model providers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model identifier (e.g. `"llama3.1"`).
    fn model_name(&self) -> &str;

    /// Generate a full completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate a completion as a stream of incremental tokens.
    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream>;
}

/// Create the appropriate [`LanguageModel`] based on configuration.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaLlm::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiLlm::new(config)?)),
        other => Err(Error::Config(format!("unknown llm provider: {}", other))),
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Generation(e.to_string()))
}

// ============ Ollama provider ============

pub struct OllamaLlm {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            client: build_client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
            "options": { "temperature": self.temperature },
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.request_body(prompt, false))
            .send()
            .await
            .map_err(|e| Error::Generation(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("{} returned {}: {}", url, status, body)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("invalid response from {}: {}", url, e)))?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Generation("invalid Ollama response: missing response field".into()))
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.request_body(prompt, true))
            .send()
            .await
            .map_err(|e| Error::Generation(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("{} returned {}: {}", url, status, body)));
        }

        let mut bytes = response.bytes_stream();

        let output = stream! {
            let mut buf = String::new();
            while let Some(part) = bytes.next().await {
                let part = match part {
                    Ok(p) => p,
                    Err(e) => {
                        yield Err(Error::Generation(format!("stream read failed: {}", e)));
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&part));

                // Ollama emits one JSON object per line.
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    match parse_ollama_line(&line) {
                        Some((token, done)) => {
                            if !token.is_empty() {
                                yield Ok(token);
                            }
                            if done {
                                return;
                            }
                        }
                        None => continue,
                    }
                }
            }
        };

        Ok(Box::pin(output))
    }
}

/// Parse one NDJSON line from Ollama's streaming response.
/// Returns `(token, done)`, or `None` for blank/unparseable lines.
fn parse_ollama_line(line: &str) -> Option<(String, bool)> {
    if line.is_empty() {
        return None;
    }
    let json: serde_json::Value = serde_json::from_str(line).ok()?;
    let token = json
        .get("response")
        .and_then(|r| r.as_str())
        .unwrap_or_default()
        .to_string();
    let done = json.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Some((token, done))
}

// ============ OpenAI provider ============

pub struct OpenAiLlm {
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::Config("OPENAI_API_KEY environment variable not set".into()));
        }
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            client: build_client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Generation("OPENAI_API_KEY not set".into()))?;

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&self.request_body(prompt, stream))
            .send()
            .await
            .map_err(|e| Error::Generation(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("OpenAI API error {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAiLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self.send(prompt, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("invalid OpenAI response: {}", e)))?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Generation("invalid OpenAI response: missing content".into()))
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream> {
        let response = self.send(prompt, true).await?;
        let mut bytes = response.bytes_stream();

        let output = stream! {
            let mut buf = String::new();
            while let Some(part) = bytes.next().await {
                let part = match part {
                    Ok(p) => p,
                    Err(e) => {
                        yield Err(Error::Generation(format!("stream read failed: {}", e)));
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&part));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    match parse_openai_sse_line(&line) {
                        SseEvent::Token(token) => {
                            if !token.is_empty() {
                                yield Ok(token);
                            }
                        }
                        SseEvent::Done => return,
                        SseEvent::Skip => continue,
                    }
                }
            }
        };

        Ok(Box::pin(output))
    }
}

enum SseEvent {
    Token(String),
    Done,
    Skip,
}

/// Parse one SSE line from OpenAI's streaming response.
fn parse_openai_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data: ") else {
        return SseEvent::Skip;
    };
    if data.trim() == "[DONE]" {
        return SseEvent::Done;
    }
    let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
        return SseEvent::Skip;
    };
    let token = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|s| s.as_str())
        .unwrap_or_default();
    SseEvent::Token(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_line_token() {
        let (token, done) =
            parse_ollama_line(r#"{"model":"llama3.1","response":"Par","done":false}"#).unwrap();
        assert_eq!(token, "Par");
        assert!(!done);
    }

    #[test]
    fn test_parse_ollama_line_done() {
        let (token, done) =
            parse_ollama_line(r#"{"model":"llama3.1","response":"","done":true}"#).unwrap();
        assert!(token.is_empty());
        assert!(done);
    }

    #[test]
    fn test_parse_ollama_line_blank_or_garbage() {
        assert!(parse_ollama_line("").is_none());
        assert!(parse_ollama_line("not json").is_none());
    }

    #[test]
    fn test_parse_sse_token() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        match parse_openai_sse_line(line) {
            SseEvent::Token(t) => assert_eq!(t, "Hel"),
            _ => panic!("expected token"),
        }
    }

    #[test]
    fn test_parse_sse_done() {
        assert!(matches!(parse_openai_sse_line("data: [DONE]"), SseEvent::Done));
    }

    #[test]
    fn test_parse_sse_skips_non_data_lines() {
        assert!(matches!(parse_openai_sse_line(""), SseEvent::Skip));
        assert!(matches!(parse_openai_sse_line(": keepalive"), SseEvent::Skip));
    }
}
