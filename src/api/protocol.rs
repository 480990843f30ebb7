//! ライブトランスポートのワイヤ形式
//!
//! WebSocketのテキストフレームに `{"event": "<名前>", "data": <ペイロード>}` を載せる。
//! `connect` / `disconnect` はフレームではなくソケットのライフサイクルから導出する。

use crate::models::{ChatMessage, SourceId};
use serde::{Deserialize, Serialize};

/// クライアントからサーバーへのイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// ルーム参加
    JoinChat {
        #[serde(rename = "sourceId")]
        source_id: SourceId,
    },
    /// ルーム退出（ベストエフォート）
    LeaveChat {
        #[serde(rename = "sourceId")]
        source_id: SourceId,
    },
}

impl ClientEvent {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// サーバーからクライアントへのイベント
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// ルーム参加の確認（情報のみ）
    JoinedChat(serde_json::Value),
    /// 権威ある全件再同期
    ChatHistory(Vec<ChatMessage>),
    /// ライブ到着（単発または一括）
    NewMessages(Vec<ChatMessage>),
    /// サーバー側エラー（ログのみ）
    Error(String),
    /// 未知のイベント
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize, Default)]
struct HistoryPayload {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ChatMessage>),
    One(Box<ChatMessage>),
}

impl ServerEvent {
    /// テキストフレームをデコードする
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(frame)?;

        let event = match envelope.event.as_str() {
            "joined_chat" => ServerEvent::JoinedChat(envelope.data),
            "chat_history" => {
                let payload = if envelope.data.is_null() {
                    HistoryPayload::default()
                } else {
                    serde_json::from_value::<HistoryPayload>(envelope.data)?
                };
                ServerEvent::ChatHistory(payload.messages)
            }
            "new_message" => match serde_json::from_value::<OneOrMany>(envelope.data)? {
                OneOrMany::Many(messages) => ServerEvent::NewMessages(messages),
                OneOrMany::One(message) => ServerEvent::NewMessages(vec![*message]),
            },
            "error" => ServerEvent::Error(describe_error(&envelope.data)),
            other => ServerEvent::Unknown(other.to_string()),
        };

        Ok(event)
    }
}

fn describe_error(data: &serde_json::Value) -> String {
    data.get("message")
        .and_then(|message| message.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}
