//! フィード投影
//!
//! ストアの内容を抑制キャッシュに通し、ストア順のまま描画用の列を作る。
//! ストアは変更しない。メッセージごとの判定は受理番号(seq)単位で一度だけ行い、
//! 以降の再投影ではその判定を再利用する（同じストアなら何度投影しても同じ結果）。

use super::connection_status::{ConnectionStatusBoard, PlatformStatus};
use super::message_store::MessageStore;
use super::suppression::{SuppressionCache, Verdict};
use crate::models::{ChatMessage, SourceId};
use crate::session::SessionPhase;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// 描画層に渡す読み取り専用ビュー
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedView {
    pub source_id: Option<SourceId>,
    pub phase: SessionPhase,
    /// 「Connected / Connecting」表示用
    pub is_connected: bool,
    pub messages: Vec<ChatMessage>,
    /// `messages`と同じ並びのストア受理番号（ソース切り替えをまたいで単調増加）
    pub seqs: Vec<u64>,
    /// 表示のみのパススルー値（本クライアントでは算出しない）
    pub viewer_count: u64,
    pub platform_status: Vec<(String, PlatformStatus)>,
    pub suppressed: usize,
}

/// 投影器
#[derive(Debug, Default)]
pub struct FeedProjection {
    verdicts: HashMap<u64, Verdict>,
}

impl FeedProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// ストアの内容を投影する
    ///
    /// 未判定のメッセージだけを抑制キャッシュと接続状態ボードに通す。
    /// 表示するメッセージを受理番号と組にして返す。
    pub fn project(
        &mut self,
        store: &MessageStore,
        cache: &mut SuppressionCache,
        board: &mut ConnectionStatusBoard,
        now_ms: i64,
    ) -> Vec<(u64, ChatMessage)> {
        let live: HashSet<u64> = store.entries().map(|entry| entry.seq).collect();
        self.verdicts.retain(|seq, _| live.contains(seq));

        let mut rendered = Vec::with_capacity(store.len());
        for entry in store.entries() {
            let verdict = *self.verdicts.entry(entry.seq).or_insert_with(|| {
                board.observe(&entry.message, now_ms);
                cache.evaluate(&entry.message, now_ms)
            });

            if verdict.is_shown() {
                rendered.push((entry.seq, entry.message.clone()));
            }
        }

        rendered
    }

    /// 現在のストアに対して抑制されたメッセージ数
    pub fn suppressed_count(&self) -> usize {
        self.verdicts
            .values()
            .filter(|verdict| !verdict.is_shown())
            .count()
    }

    pub fn clear(&mut self) {
        self.verdicts.clear();
    }
}
