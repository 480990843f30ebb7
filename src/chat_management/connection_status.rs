//! プラットフォーム別の接続状態ボード
//!
//! 抑制された接続通知の代わりに、プラットフォームごとの接続状態をUIに出すための集計。
//! 接続通知は「接続中」、エラー系のシステム通知は「切断」として反映する。

use super::suppression::match_connection_notice;
use crate::models::{ChatMessage, Platform};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn error_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"(?i)failed to connect", r"(?i)connection failed", r"(?i)error"]
            .into_iter()
            .map(|pattern| Regex::new(pattern).expect("error notice pattern must compile"))
            .collect()
    })
}

fn platform_mention() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(youtube|twitch|facebook)").expect("platform pattern must compile")
    })
}

/// プラットフォーム1件分の状態
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PlatformStatus {
    pub connected: bool,
    /// 接続方式（grpc / streaming / irc）
    pub method: Option<String>,
    pub last_connected_ms: Option<i64>,
    pub last_error: Option<String>,
    pub last_error_ms: Option<i64>,
}

/// 接続状態ボード
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStatusBoard {
    platforms: BTreeMap<String, PlatformStatus>,
}

impl ConnectionStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// システム通知を観測して状態を更新する。更新があればtrue
    pub fn observe(&mut self, message: &ChatMessage, now_ms: i64) -> bool {
        if !message.is_system_notice() {
            return false;
        }

        if let Some(pattern) = match_connection_notice(message) {
            let status = self.entry(&pattern.platform);
            status.connected = true;
            status.method = Some(pattern.method.to_string());
            status.last_connected_ms = Some(now_ms);
            return true;
        }

        let text = &message.message_text;
        if !error_patterns().iter().any(|pattern| pattern.is_match(text)) {
            return false;
        }

        let Some(mention) = platform_mention().captures(text).and_then(|c| c.get(1)) else {
            return false;
        };

        let platform = Platform::from(mention.as_str().to_string());
        tracing::info!(
            platform = %platform,
            error = %text,
            "⚠️ [CONNECTION_STATUS] Platform reported a connection error"
        );

        let status = self.entry(&platform);
        status.connected = false;
        status.last_error = Some(text.clone());
        status.last_error_ms = Some(now_ms);
        true
    }

    pub fn get(&self, platform: &Platform) -> Option<&PlatformStatus> {
        self.platforms.get(platform.as_str())
    }

    /// プラットフォーム名順の状態一覧
    pub fn snapshot(&self) -> Vec<(String, PlatformStatus)> {
        self.platforms
            .iter()
            .map(|(name, status)| (name.clone(), status.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn clear(&mut self) {
        self.platforms.clear();
    }

    fn entry(&mut self, platform: &Platform) -> &mut PlatformStatus {
        self.platforms
            .entry(platform.as_str().to_string())
            .or_default()
    }
}
