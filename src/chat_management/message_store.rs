//! 重複排除メッセージストア
//!
//! 到着順のメッセージ列と、メッセージIDの所属集合を保持する。
//! RESTスナップショット・履歴同期は`replace_all`、ライブ到着は`append_deduped`で取り込む。

use crate::models::{ChatMessage, MessageId};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

/// 保持件数ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// 制限なし
    #[default]
    Unbounded,
    /// 直近N件のみ保持（古いものから破棄し、そのIDも忘れる）
    Recent(usize),
}

/// IDを持たないメッセージの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlessPolicy {
    /// 追跡不能として常に追加する
    #[default]
    PassThrough,
    /// 投稿者・本文・作成時刻から代替IDを合成して重複排除する
    Fingerprint,
}

/// ストア設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub idless_policy: IdlessPolicy,
}

/// ストア内の1エントリ
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    /// ストア内で単調増加する受理番号（投影側の判定メモのキー）
    pub seq: u64,
    /// 重複排除に使ったキー（追跡不能ならNone）
    pub key: Option<MessageId>,
    pub message: ChatMessage,
}

/// `append_deduped`の結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub appended: usize,
    pub duplicates: usize,
}

impl AppendOutcome {
    pub fn changed(&self) -> bool {
        self.appended > 0
    }
}

/// ストア統計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStoreStats {
    pub retained: usize,
    pub tracked_ids: usize,
    pub total_accepted: usize,
    pub duplicates_dropped: usize,
    pub evicted: usize,
}

/// 重複排除ストア
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: VecDeque<StoredMessage>,
    known_ids: HashSet<MessageId>,
    next_seq: u64,
    config: StoreConfig,
    total_accepted: usize,
    duplicates_dropped: usize,
    evicted: usize,
}

impl MessageStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// 全置換（スナップショット・`chat_history`用）
    ///
    /// 所属集合をクリアし、渡された順序を新しい基準順序とする。
    /// スナップショット内で同じIDが重複していた場合は最初の1件のみ残す。
    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.entries.clear();
        self.known_ids.clear();

        let incoming = messages.len();
        let mut skipped = 0;
        for message in messages {
            let key = self.dedup_key(&message);
            if let Some(key) = &key {
                if !self.known_ids.insert(key.clone()) {
                    skipped += 1;
                    continue;
                }
            }
            self.push_entry(key, message);
        }
        self.duplicates_dropped += skipped;

        if skipped > 0 {
            tracing::debug!(
                incoming,
                skipped,
                "🔁 [MESSAGE_STORE] Duplicate ids inside snapshot were collapsed"
            );
        }

        self.apply_retention();
    }

    /// 重複排除付き追加（ライブ到着用）
    ///
    /// 到着順を保ち、既存メッセージの並べ替えや削除は行わない。
    pub fn append_deduped(&mut self, messages: Vec<ChatMessage>) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();

        for message in messages {
            let key = self.dedup_key(&message);
            if let Some(key) = &key {
                if self.known_ids.contains(key) {
                    outcome.duplicates += 1;
                    continue;
                }
                self.known_ids.insert(key.clone());
            }
            self.push_entry(key, message);
            outcome.appended += 1;
        }

        self.duplicates_dropped += outcome.duplicates;
        if outcome.appended > 0 {
            self.apply_retention();
        }

        outcome
    }

    /// 全メッセージと所属集合をクリア
    pub fn clear(&mut self) {
        self.entries.clear();
        self.known_ids.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_id(&self, id: &MessageId) -> bool {
        self.known_ids.contains(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &StoredMessage> {
        self.entries.iter()
    }

    /// 現在の保持メッセージ（ストア順）
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(|entry| entry.message.clone()).collect()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn stats(&self) -> MessageStoreStats {
        MessageStoreStats {
            retained: self.entries.len(),
            tracked_ids: self.known_ids.len(),
            total_accepted: self.total_accepted,
            duplicates_dropped: self.duplicates_dropped,
            evicted: self.evicted,
        }
    }

    fn push_entry(&mut self, key: Option<MessageId>, message: ChatMessage) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_accepted += 1;
        self.entries.push_back(StoredMessage { seq, key, message });
    }

    fn dedup_key(&self, message: &ChatMessage) -> Option<MessageId> {
        match (message.tracking_id(), self.config.idless_policy) {
            (Some(id), _) => Some(id.clone()),
            (None, IdlessPolicy::PassThrough) => None,
            (None, IdlessPolicy::Fingerprint) => Some(fingerprint(message)),
        }
    }

    fn apply_retention(&mut self) {
        let RetentionPolicy::Recent(limit) = self.config.retention else {
            return;
        };

        while self.entries.len() > limit {
            if let Some(oldest) = self.entries.pop_front() {
                if let Some(key) = oldest.key {
                    self.known_ids.remove(&key);
                }
                self.evicted += 1;
            }
        }
    }
}

/// IDを持たないメッセージの代替IDを合成
fn fingerprint(message: &ChatMessage) -> MessageId {
    let mut hasher = DefaultHasher::new();
    message.author_name.hash(&mut hasher);
    message.message_text.hash(&mut hasher);
    message.created_at.hash(&mut hasher);

    MessageId(format!("fp_{:016x}", hasher.finish()))
}
