//! エラー型
//!
//! チャット購読経路のエラーはどれもホストにとって致命的ではなく、
//! 「チャットが欠けている・古い可能性がある」状態に縮退するだけ。

use std::path::PathBuf;
use thiserror::Error;

/// RESTスナップショット取得エラー
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode snapshot: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid API base URL: {0}")]
    InvalidUrl(String),
}

/// ライブトランスポートのエラー
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid transport URL: {0}")]
    InvalidUrl(String),

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// 設定ファイルのエラー
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine project directories")]
    NoProjectDirs,

    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// クレート全体のエラー
#[derive(Error, Debug)]
pub enum ChatfeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Chat client task has stopped")]
    ClientStopped,
}

pub type ChatfeedResult<T> = Result<T, ChatfeedError>;
