//! Chat-completion client used by Stage B.
//!
//! The trait mirrors an async-generator-of-text-chunks contract; the one
//! concrete implementation speaks the OpenAI-compatible streaming chat
//! completions wire format (`data: ` lines, a `[DONE]` sentinel,
//! `choices[0].delta.content`).

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response stream ended unexpectedly")]
    StreamClosed,
}

/// Chat completion backend, streaming one text delta at a time.
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    /// Starts a completion for `text`, returning a receiver of text deltas.
    /// The channel closes when the stream ends or errors.
    async fn generate(&self, text: &str) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError>;
}

/// OpenAI-compatible HTTP streaming client.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        model: String,
        system_prompt: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
            system_prompt,
        }
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAiCompatibleClient {
    async fn generate(&self, text: &str) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": text},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Request(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    if line.is_empty() {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }

                    let parsed: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(content) = parsed["choices"][0]["delta"]["content"].as_str()
                        && !content.is_empty()
                        && tx.send(Ok(content.to_owned())).await.is_err()
                    {
                        return;
                    }

                    if parsed["choices"][0]["finish_reason"].as_str().is_some() {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
