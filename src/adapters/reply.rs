//! Reply generator adapters

use async_trait::async_trait;

use super::ReplyGenerator;
use crate::{Error, Result};

/// Reply generator backed by an HTTP chat endpoint
///
/// POSTs `{"text": …}` and reads the reply out of `reply`, `text` or
/// `output`, whichever the backing service answers with.
pub struct HttpReplyGenerator {
    client: reqwest::Client,
    chat_url: String,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    text: &'a str,
}

#[derive(serde::Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    output: Option<String>,
}

impl HttpReplyGenerator {
    #[must_use]
    pub fn new(chat_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            chat_url,
        }
    }
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    async fn generate(&self, text: &str) -> Result<String> {
        tracing::debug!(chars = text.len(), url = %self.chat_url, "requesting reply");

        let response = self
            .client
            .post(&self.chat_url)
            .json(&ChatRequest { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat endpoint error");
            return Err(Error::Reply(format!("chat endpoint error {status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await?;
        let reply = parsed
            .reply
            .or(parsed.text)
            .or(parsed.output)
            .unwrap_or_default()
            .trim()
            .to_string();

        tracing::info!(chars = reply.len(), "reply generated");
        Ok(reply)
    }
}

/// Placeholder when no reply provider is configured
///
/// Every call fails with [`Error::NotConfigured`] so downstream can show
/// a specific "not configured" indicator instead of a silent empty reply.
pub struct NullReplyGenerator;

#[async_trait]
impl ReplyGenerator for NullReplyGenerator {
    async fn generate(&self, _text: &str) -> Result<String> {
        Err(Error::NotConfigured("reply generator"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_generator_reports_not_configured() {
        let result = NullReplyGenerator.generate("hello").await;
        assert!(matches!(result, Err(Error::NotConfigured(_))));
    }

    #[test]
    fn chat_response_prefers_reply_key() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"reply":"a","text":"b","output":"c"}"#).unwrap();
        let reply = parsed.reply.or(parsed.text).or(parsed.output).unwrap();
        assert_eq!(reply, "a");
    }

    #[test]
    fn chat_response_falls_back_to_output_key() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"output":"c"}"#).unwrap();
        let reply = parsed.reply.or(parsed.text).or(parsed.output).unwrap();
        assert_eq!(reply, "c");
    }
}
