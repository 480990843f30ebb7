//! RESTスナップショット取得
//!
//! セッション開始時に一度だけ、ソースの既存メッセージを公開エンドポイントから取得する。

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::models::{ChatMessage, SourceId};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// スナップショット取得の抽象
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// ソースのメッセージ一覧を取得する
    async fn fetch_messages(&self, source_id: &SourceId) -> Result<Vec<ChatMessage>, FetchError>;
}

#[derive(Debug, Default, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

/// `GET {base}{prefix}/chat/public/sources/{id}/messages` を叩くクライアント
#[derive(Debug, Clone)]
pub struct RestClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let base_url = rest_base_url(config)?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn messages_url(&self, source_id: &SourceId) -> String {
        format!(
            "{}/chat/public/sources/{}/messages",
            self.base_url,
            urlencoding::encode(source_id.as_str())
        )
    }
}

#[async_trait]
impl SnapshotSource for RestClient {
    async fn fetch_messages(&self, source_id: &SourceId) -> Result<Vec<ChatMessage>, FetchError> {
        let url = self.messages_url(source_id);
        tracing::debug!("📡 [REST] Fetching chat snapshot: {}", url);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            tracing::error!("❌ [REST] HTTP request failed: {}", e);
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("❌ [REST] Snapshot request failed with status: {}", status);
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        let messages = parse_messages_body(&body)?;
        tracing::info!(
            "📥 [REST] Snapshot fetched: {} messages for source {}",
            messages.len(),
            source_id
        );
        Ok(messages)
    }
}

/// レスポンス本文を解析する（`messages`欠落は空扱い）
pub fn parse_messages_body(body: &str) -> Result<Vec<ChatMessage>, FetchError> {
    let response: MessagesResponse = serde_json::from_str(body).map_err(|e| {
        tracing::debug!(
            "🔍 [REST] Response preview: {}",
            body.chars().take(200).collect::<String>()
        );
        e
    })?;
    Ok(response.messages)
}

fn rest_base_url(config: &ApiConfig) -> Result<String, FetchError> {
    let base = config.base_url.trim().trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(FetchError::InvalidUrl(config.base_url.clone()));
    }

    let prefix = config.rest_path_prefix.trim().trim_matches('/');
    if prefix.is_empty() {
        Ok(base.to_string())
    } else {
        Ok(format!("{}/{}", base, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str, prefix: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            rest_path_prefix: prefix.to_string(),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_messages_url() {
        let client = RestClient::new(&config("https://api.neustream.app/", "/api")).unwrap();
        let url = client.messages_url(&SourceId::parse("17").unwrap());
        assert_eq!(
            url,
            "https://api.neustream.app/api/chat/public/sources/17/messages"
        );
    }

    #[test]
    fn test_messages_url_without_prefix_encodes_id() {
        let client = RestClient::new(&config("http://localhost:3000", "")).unwrap();
        let url = client.messages_url(&SourceId::parse("a b").unwrap());
        assert_eq!(url, "http://localhost:3000/chat/public/sources/a%20b/messages");
    }

    #[test]
    fn test_rejects_non_http_base() {
        let err = RestClient::new(&config("ftp://example.com", "/api")).unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[test]
    fn test_parse_body() {
        let body = r#"{"messages":[{"id":5,"authorName":"x","messageText":"hello","platform":"twitch"}]}"#;
        let messages = parse_messages_body(body).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_text, "hello");
    }

    #[test]
    fn test_parse_body_without_messages_is_empty() {
        assert!(parse_messages_body("{}").unwrap().is_empty());
        assert!(matches!(
            parse_messages_body("<html>"),
            Err(FetchError::Decode(_))
        ));
    }
}
