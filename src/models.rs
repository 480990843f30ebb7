//! チャットメッセージのデータモデル
//!
//! RESTスナップショットとライブ配信の両方で共通に使う`ChatMessage`と、
//! プラットフォーム・メッセージ種別の語彙を定義する。

use serde::{Deserialize, Deserializer, Serialize};

/// システム通知の投稿者名
pub const SYSTEM_AUTHOR: &str = "System";

/// 文字列または数値のJSON値を文字列として受け取る
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(raw: StringOrNumber) -> Self {
        match raw {
            StringOrNumber::Text(text) => text,
            StringOrNumber::Number(number) => number.to_string(),
        }
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

/// 配信ソースID（チャットルームのスコープ単位）
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, Serialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// 空白のみ・空文字列は「ソースなし」として扱う
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for SourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: String = StringOrNumber::deserialize(deserializer)?.into();
        SourceId::parse(&raw).ok_or_else(|| serde::de::Error::custom("empty source id"))
    }
}

/// メッセージID
///
/// DB由来のスナップショットでは数値、ライブ配信では`msg_...`形式の文字列で届く。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(MessageId(StringOrNumber::deserialize(deserializer)?.into()))
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId(value.to_string())
    }
}

/// 配信プラットフォーム
///
/// 未知の値は拒否せず`Other`としてそのまま通す。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Platform {
    Twitch,
    Youtube,
    Facebook,
    Custom,
    Other(String),
}

impl Platform {
    pub fn as_str(&self) -> &str {
        match self {
            Platform::Twitch => "twitch",
            Platform::Youtube => "youtube",
            Platform::Facebook => "facebook",
            Platform::Custom => "custom",
            Platform::Other(raw) => raw,
        }
    }
}

impl From<String> for Platform {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "twitch" => Platform::Twitch,
            "youtube" => Platform::Youtube,
            "facebook" => Platform::Facebook,
            "custom" => Platform::Custom,
            _ => Platform::Other(raw),
        }
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.as_str().to_string()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// メッセージ種別
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    #[default]
    Text,
    System,
    /// プラットフォーム固有の拡張種別
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Text => "text",
            MessageType::System => "system",
            MessageType::Other(raw) => raw,
        }
    }
}

impl From<String> for MessageType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "text" => MessageType::Text,
            "system" => MessageType::System,
            _ => MessageType::Other(raw),
        }
    }
}

impl From<MessageType> for String {
    fn from(message_type: MessageType) -> Self {
        message_type.as_str().to_string()
    }
}

/// チャットメッセージ（1件のチャットイベント）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub connector_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub platform_message_id: Option<String>,
    #[serde(default)]
    pub author_name: String,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub author_id: Option<String>,
    #[serde(default)]
    pub message_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    /// ISO-8601。表示用のみで、マージ順序には使わない（到着順がマージ順）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ChatMessage {
    /// 通常のテキストメッセージを作成
    pub fn text(id: Option<&str>, author: &str, text: &str) -> Self {
        Self {
            id: id.map(MessageId::from),
            author_name: author.to_string(),
            message_text: text.to_string(),
            message_type: MessageType::Text,
            ..Default::default()
        }
    }

    /// バックエンド生成のシステム通知を作成
    pub fn system(id: Option<&str>, text: &str) -> Self {
        Self {
            id: id.map(MessageId::from),
            author_name: SYSTEM_AUTHOR.to_string(),
            message_text: text.to_string(),
            message_type: MessageType::System,
            ..Default::default()
        }
    }

    /// 重複排除に使えるIDを返す（空文字列のIDは追跡不能として扱う）
    pub fn tracking_id(&self) -> Option<&MessageId> {
        self.id.as_ref().filter(|id| !id.0.trim().is_empty())
    }

    /// 抑制候補となるシステム通知かどうか
    pub fn is_system_notice(&self) -> bool {
        self.message_type == MessageType::System && self.author_name == SYSTEM_AUTHOR
    }

    pub fn created_at_parsed(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.created_at
            .as_deref()
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}
