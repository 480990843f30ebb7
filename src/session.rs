//! 接続セッション
//!
//! 1つのアクティブなソースに対して、ライブトランスポートをちょうど1本だけ保持する状態機械。
//! I/Oは行わず、受信イベントを適用して実行すべきコマンド列を返す。
//! 実際のソケット操作とREST取得は`client`モジュールの駆動タスクが担う。
//!
//! 非同期の結果（REST応答・トランスポートイベント）はすべて発行時のセッション世代で
//! タグ付けされ、現在の世代と一致する場合にだけ適用される。

use crate::api::protocol::ClientEvent;
use crate::chat_management::{
    ConnectionStatusBoard, FeedProjection, FeedView, MessageStore, StoreConfig, SuppressionCache,
    SuppressionConfig,
};
use crate::models::{ChatMessage, SourceId};
use serde::Serialize;

/// セッションのフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Joined,
    Leaving,
}

/// セッション世代（ソース切り替え・破棄のたびに増える）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, derive_more::Display)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

/// セッションへの受信イベント
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// トランスポート接続（自動再接続を含む）
    Connected,
    /// トランスポート切断
    Disconnected,
    /// ルーム参加確認
    JoinedAck(serde_json::Value),
    /// `chat_history`による全件再同期
    HistorySnapshot(Vec<ChatMessage>),
    /// ライブ到着
    NewMessages(Vec<ChatMessage>),
    /// トランスポートのエラー通知（ログのみ）
    TransportError(String),
    /// トランスポートが再接続を断念して停止した
    TransportClosed(String),
    /// RESTスナップショット取得成功
    SnapshotFetched(Vec<ChatMessage>),
    /// RESTスナップショット取得失敗
    SnapshotFailed(String),
}

/// 世代タグ付きイベント
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub generation: Generation,
    pub event: InboundEvent,
}

impl SessionEvent {
    pub fn new(generation: Generation, event: InboundEvent) -> Self {
        Self { generation, event }
    }
}

/// 駆動タスクが実行するコマンド
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// トランスポートを開く
    OpenTransport {
        generation: Generation,
        source_id: SourceId,
    },
    /// RESTスナップショットを取得する（1セッション1回）
    FetchSnapshot {
        generation: Generation,
        source_id: SourceId,
    },
    /// トランスポートへイベントを送る（応答は待たない）
    Emit {
        generation: Generation,
        event: ClientEvent,
    },
    /// トランスポートを閉じる
    CloseTransport { generation: Generation },
}

/// 接続セッション
#[derive(Debug)]
pub struct ChatSession {
    source_id: Option<SourceId>,
    phase: SessionPhase,
    generation: Generation,
    store: MessageStore,
    suppression: SuppressionCache,
    projection: FeedProjection,
    status_board: ConnectionStatusBoard,
    /// 現在の世代のトランスポートが生きているか
    transport_open: bool,
    feed: Vec<ChatMessage>,
    feed_seqs: Vec<u64>,
    viewer_count: u64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new(StoreConfig::default(), SuppressionConfig::default())
    }
}

impl ChatSession {
    pub fn new(store_config: StoreConfig, suppression_config: SuppressionConfig) -> Self {
        Self {
            source_id: None,
            phase: SessionPhase::Idle,
            generation: Generation::default(),
            store: MessageStore::new(store_config),
            suppression: SuppressionCache::new(suppression_config),
            projection: FeedProjection::new(),
            status_board: ConnectionStatusBoard::new(),
            transport_open: false,
            feed: Vec::new(),
            feed_seqs: Vec::new(),
            viewer_count: 0,
        }
    }

    /// アクティブなソースを設定する
    ///
    /// - 同じソースに生きているトランスポートがあれば何もしない
    /// - 同じソースでもトランスポートが停止済みなら開き直す
    /// - 別のソースに紐付いていれば、退出＋切断を発行してから新しいソースへ接続
    /// - `None`ならホスト破棄として退出＋切断のみ（フェーズは`Leaving`のまま残る）
    pub fn activate(&mut self, source_id: Option<SourceId>) -> Vec<SessionCommand> {
        let Some(requested) = source_id else {
            return self.teardown();
        };

        if self.source_id.as_ref() == Some(&requested) {
            if self.transport_open {
                tracing::debug!(
                    source_id = %requested,
                    "⏭️ [CHAT_SESSION] Transport already bound to this source, ignoring activation"
                );
                return Vec::new();
            }
            tracing::info!(
                source_id = %requested,
                "🔁 [CHAT_SESSION] Transport for this source has stopped, reopening"
            );
        }

        let mut commands = self.teardown();
        commands.extend(self.open(requested));
        commands
    }

    /// ホスト破棄・ソース切り替え時の後始末
    ///
    /// セッションローカルの状態（ストア・抑制キャッシュ）はここで同期的に空にする。
    /// 退出・切断コマンドの実行後に[`ChatSession::finish_leaving`]で`Idle`へ戻す。
    pub fn teardown(&mut self) -> Vec<SessionCommand> {
        let Some(source_id) = self.source_id.take() else {
            return Vec::new();
        };

        self.phase = SessionPhase::Leaving;
        let generation = self.generation;
        tracing::info!(
            source_id = %source_id,
            generation = %generation,
            "🛑 [CHAT_SESSION] Leaving chat room"
        );

        let commands = vec![
            SessionCommand::Emit {
                generation,
                event: ClientEvent::LeaveChat { source_id },
            },
            SessionCommand::CloseTransport { generation },
        ];

        self.reset_state();
        self.transport_open = false;
        self.generation = self.generation.next();
        commands
    }

    /// 退出処理を完了して`Idle`へ戻す
    pub fn finish_leaving(&mut self) {
        if self.phase == SessionPhase::Leaving {
            self.phase = SessionPhase::Idle;
        }
    }

    fn open(&mut self, source_id: SourceId) -> Vec<SessionCommand> {
        self.generation = self.generation.next();
        self.source_id = Some(source_id.clone());
        self.phase = SessionPhase::Connecting;
        self.transport_open = true;

        tracing::info!(
            source_id = %source_id,
            generation = %self.generation,
            "▶️ [CHAT_SESSION] Opening chat session"
        );

        vec![
            SessionCommand::OpenTransport {
                generation: self.generation,
                source_id: source_id.clone(),
            },
            SessionCommand::FetchSnapshot {
                generation: self.generation,
                source_id,
            },
        ]
    }

    /// 受信イベントを適用する
    ///
    /// 現在の世代と一致しないイベントは古いセッションのものとして破棄する。
    pub fn handle(&mut self, event: SessionEvent, now_ms: i64) -> Vec<SessionCommand> {
        let Some(source_id) = self.source_id.clone() else {
            tracing::debug!(
                generation = %event.generation,
                "🗑️ [CHAT_SESSION] Event arrived with no active source, discarded"
            );
            return Vec::new();
        };

        if event.generation != self.generation {
            tracing::debug!(
                event_generation = %event.generation,
                current_generation = %self.generation,
                "🗑️ [CHAT_SESSION] Stale event discarded"
            );
            return Vec::new();
        }

        match event.event {
            InboundEvent::Connected => {
                tracing::info!(source_id = %source_id, "✅ [CHAT_SESSION] Transport connected, joining room");
                self.phase = SessionPhase::Connecting;
                return vec![SessionCommand::Emit {
                    generation: self.generation,
                    event: ClientEvent::JoinChat { source_id },
                }];
            }
            InboundEvent::JoinedAck(ack) => {
                if self.phase == SessionPhase::Connecting {
                    self.phase = SessionPhase::Joined;
                }
                tracing::info!(source_id = %source_id, ack = %ack, "🚪 [CHAT_SESSION] Joined chat room");
            }
            InboundEvent::Disconnected => {
                tracing::warn!(source_id = %source_id, "🔌 [CHAT_SESSION] Transport disconnected");
                self.phase = SessionPhase::Idle;
            }
            InboundEvent::HistorySnapshot(messages) => {
                tracing::info!(count = messages.len(), "📜 [CHAT_SESSION] Chat history received");
                self.store.replace_all(messages);
                self.reproject(now_ms);
            }
            InboundEvent::SnapshotFetched(messages) => {
                tracing::info!(count = messages.len(), "📥 [CHAT_SESSION] REST snapshot applied");
                self.store.replace_all(messages);
                self.reproject(now_ms);
            }
            InboundEvent::NewMessages(messages) => {
                let outcome = self.store.append_deduped(messages);
                if outcome.duplicates > 0 {
                    tracing::debug!(
                        duplicates = outcome.duplicates,
                        "🔁 [CHAT_SESSION] Duplicate live messages dropped"
                    );
                }
                if outcome.changed() {
                    self.reproject(now_ms);
                }
            }
            InboundEvent::SnapshotFailed(error) => {
                tracing::warn!(
                    source_id = %source_id,
                    error = %error,
                    "⚠️ [CHAT_SESSION] REST snapshot failed, continuing with live transport only"
                );
            }
            InboundEvent::TransportError(error) => {
                tracing::warn!(source_id = %source_id, error = %error, "⚠️ [CHAT_SESSION] Transport error");
            }
            InboundEvent::TransportClosed(reason) => {
                tracing::error!(
                    source_id = %source_id,
                    reason = %reason,
                    "🚨 [CHAT_SESSION] Transport stopped, waiting for reactivation"
                );
                self.phase = SessionPhase::Idle;
                self.transport_open = false;
                return vec![SessionCommand::CloseTransport {
                    generation: self.generation,
                }];
            }
        }

        Vec::new()
    }

    fn reproject(&mut self, now_ms: i64) {
        let (seqs, messages) = self
            .projection
            .project(
                &self.store,
                &mut self.suppression,
                &mut self.status_board,
                now_ms,
            )
            .into_iter()
            .unzip();
        self.feed_seqs = seqs;
        self.feed = messages;
    }

    fn reset_state(&mut self) {
        self.store.clear();
        self.suppression.clear();
        self.projection.clear();
        self.status_board.clear();
        self.feed.clear();
        self.feed_seqs.clear();
    }

    pub fn set_viewer_count(&mut self, viewer_count: u64) {
        self.viewer_count = viewer_count;
    }

    pub fn source_id(&self) -> Option<&SourceId> {
        self.source_id.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_transport_open(&self) -> bool {
        self.transport_open
    }

    /// 描画用の投影済みフィード
    pub fn feed(&self) -> &[ChatMessage] {
        &self.feed
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn suppression(&self) -> &SuppressionCache {
        &self.suppression
    }

    pub fn view(&self) -> FeedView {
        FeedView {
            source_id: self.source_id.clone(),
            phase: self.phase,
            is_connected: self.phase == SessionPhase::Joined,
            messages: self.feed.clone(),
            seqs: self.feed_seqs.clone(),
            viewer_count: self.viewer_count,
            platform_status: self.status_board.snapshot(),
            suppressed: self.projection.suppressed_count(),
        }
    }
}
