//! 接続ステータス通知の抑制キャッシュ
//!
//! 「<platform> chat に <method> で接続しました」系のシステム通知は再接続のたびに
//! 繰り返し届くため、カテゴリ（プラットフォーム＋接続方式）ごとに時間窓で間引く。
//!
//! 判定規則:
//! - 初めて見るキーは記録した上で抑制する
//! - 記録済みキーは、最後に記録してから抑制窓（既定300秒）が経過していれば表示して記録を更新
//! - 窓内なら抑制し、記録時刻は更新しない
//! - 判定のたびに、陳腐化期間（既定600秒）を超えたエントリを先に掃除する

use crate::models::{ChatMessage, Platform};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// 抑制キー（プラットフォーム＋接続方式）
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct SuppressionKey(String);

impl SuppressionKey {
    pub fn new(platform: &Platform, method: &str) -> Self {
        Self(format!("{}/{}", platform, method))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 接続通知パターン
#[derive(Debug)]
pub struct ConnectionPattern {
    pub platform: Platform,
    pub method: &'static str,
    regex: Regex,
}

impl ConnectionPattern {
    pub fn key(&self) -> SuppressionKey {
        SuppressionKey::new(&self.platform, self.method)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// 接続通知パターン表（先に一致したものが優先）
pub fn connection_patterns() -> &'static [ConnectionPattern] {
    static PATTERNS: OnceLock<Vec<ConnectionPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"(?i)connected to.*youtube chat.*via real-time grpc streaming",
                Platform::Youtube,
                "grpc",
            ),
            (
                r"(?i)connected to.*youtube chat.*via real-time streaming",
                Platform::Youtube,
                "streaming",
            ),
            (r"(?i)connected to.*twitch chat", Platform::Twitch, "irc"),
        ]
        .into_iter()
        .map(|(pattern, platform, method)| ConnectionPattern {
            platform,
            method,
            regex: Regex::new(pattern).expect("connection notice pattern must compile"),
        })
        .collect()
    })
}

/// システム通知が接続通知パターンに一致すればそのパターンを返す
pub fn match_connection_notice(message: &ChatMessage) -> Option<&'static ConnectionPattern> {
    if !message.is_system_notice() {
        return None;
    }
    connection_patterns()
        .iter()
        .find(|pattern| pattern.is_match(&message.message_text))
}

/// 抑制設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    /// 抑制窓（秒）
    pub window_secs: u64,
    /// 陳腐化期間（秒）。抑制窓より長くすること
    pub staleness_secs: u64,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            staleness_secs: 600,
        }
    }
}

impl SuppressionConfig {
    fn window_ms(&self) -> i64 {
        (self.window_secs as i64).saturating_mul(1000)
    }

    fn staleness_ms(&self) -> i64 {
        (self.staleness_secs as i64).saturating_mul(1000)
    }
}

/// 判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Show,
    Suppress,
}

impl Verdict {
    pub fn is_shown(self) -> bool {
        matches!(self, Verdict::Show)
    }
}

/// 抑制キャッシュ（キー → 最終記録時刻 epoch ms）
#[derive(Debug, Default)]
pub struct SuppressionCache {
    entries: HashMap<SuppressionKey, i64>,
    config: SuppressionConfig,
}

impl SuppressionCache {
    pub fn new(config: SuppressionConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    /// メッセージを表示するかどうかを判定する
    ///
    /// 接続通知パターンに一致しないメッセージは常に表示。
    pub fn evaluate(&mut self, message: &ChatMessage, now_ms: i64) -> Verdict {
        let Some(pattern) = match_connection_notice(message) else {
            return Verdict::Show;
        };

        self.evict_stale(now_ms);

        let key = pattern.key();
        let verdict = match self.entries.get(&key) {
            None => {
                self.entries.insert(key.clone(), now_ms);
                Verdict::Suppress
            }
            Some(&last_ms) if now_ms.saturating_sub(last_ms) >= self.config.window_ms() => {
                self.entries.insert(key.clone(), now_ms);
                Verdict::Show
            }
            Some(_) => Verdict::Suppress,
        };

        tracing::debug!(
            key = %key,
            verdict = ?verdict,
            text = %message.message_text,
            "🔕 [SUPPRESSION] Connection notice evaluated"
        );

        verdict
    }

    /// 陳腐化期間を超えたエントリを削除
    fn evict_stale(&mut self, now_ms: i64) {
        let staleness_ms = self.config.staleness_ms();
        let before = self.entries.len();
        self.entries
            .retain(|_, last_ms| now_ms.saturating_sub(*last_ms) <= staleness_ms);

        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "🧹 [SUPPRESSION] Stale suppression keys evicted");
        }
    }

    pub fn last_shown_at(&self, key: &SuppressionKey) -> Option<i64> {
        self.entries.get(key).copied()
    }

    pub fn contains_key(&self, key: &SuppressionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn config(&self) -> &SuppressionConfig {
        &self.config
    }
}
