//! チャットクライアント
//!
//! [`ChatSession`]を単一の駆動タスクが所有し、ホストからの操作とトランスポート・REST
//! からのイベントを1本のループで直列に適用する。セッションが返すコマンドはここで
//! 実際のI/Oに変換される。描画層へは[`FeedView`]を`watch`チャンネルで公開する。

use crate::api::rest::{RestClient, SnapshotSource};
use crate::api::transport::{Transport, TransportLink, WebSocketTransport};
use crate::chat_management::FeedView;
use crate::config::AppConfig;
use crate::error::{ChatfeedError, ChatfeedResult};
use crate::models::SourceId;
use crate::session::{
    ChatSession, Generation, InboundEvent, SessionCommand, SessionEvent, SessionPhase,
};
use crate::utils::now_ms;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug)]
enum ControlMessage {
    SetSource(Option<SourceId>),
    SetViewerCount(u64),
    Shutdown,
}

/// 駆動タスクの生成
pub struct ChatClient;

impl ChatClient {
    /// 実トランスポート（WebSocket + REST）で起動する
    pub fn connect(config: &AppConfig) -> ChatfeedResult<ChatClientHandle> {
        let transport = WebSocketTransport::new(&config.api, &config.transport)?;
        let snapshots = RestClient::new(&config.api)?;
        Ok(Self::spawn(config, Arc::new(transport), Arc::new(snapshots)))
    }

    /// 任意のトランスポートとスナップショット取得元で起動する
    pub fn spawn(
        config: &AppConfig,
        transport: Arc<dyn Transport>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> ChatClientHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(FeedView::default());

        let worker = ClientWorker {
            session: ChatSession::new(config.store.clone(), config.suppression.clone()),
            transport,
            snapshots,
            links: HashMap::new(),
            fetches: HashMap::new(),
            events_tx,
            view_tx,
        };
        let task = tokio::spawn(worker.run(control_rx, events_rx));

        tracing::info!("🚀 [CHAT_CLIENT] Chat client started");
        ChatClientHandle {
            control: control_tx,
            view_rx,
            task,
        }
    }
}

/// ホスト側のハンドル
pub struct ChatClientHandle {
    control: mpsc::UnboundedSender<ControlMessage>,
    view_rx: watch::Receiver<FeedView>,
    task: JoinHandle<()>,
}

impl ChatClientHandle {
    /// アクティブなソースを変更する（`None`で切断）
    pub fn set_source(&self, source_id: Option<SourceId>) -> ChatfeedResult<()> {
        self.send(ControlMessage::SetSource(source_id))
    }

    /// 表示用の視聴者数を設定する
    pub fn set_viewer_count(&self, viewer_count: u64) -> ChatfeedResult<()> {
        self.send(ControlMessage::SetViewerCount(viewer_count))
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedView> {
        self.view_rx.clone()
    }

    pub fn current(&self) -> FeedView {
        self.view_rx.borrow().clone()
    }

    /// 退出・切断してから駆動タスクの終了を待つ
    pub async fn shutdown(self) -> ChatfeedResult<()> {
        // タスクが既に止まっていても終了待ちは行う
        let _ = self.control.send(ControlMessage::Shutdown);
        self.task.await.map_err(|e| {
            tracing::error!("❌ [CHAT_CLIENT] Client task failed: {}", e);
            ChatfeedError::ClientStopped
        })
    }

    fn send(&self, message: ControlMessage) -> ChatfeedResult<()> {
        self.control
            .send(message)
            .map_err(|_| ChatfeedError::ClientStopped)
    }
}

struct ClientWorker {
    session: ChatSession,
    transport: Arc<dyn Transport>,
    snapshots: Arc<dyn SnapshotSource>,
    links: HashMap<Generation, Box<dyn TransportLink>>,
    fetches: HashMap<Generation, JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    view_tx: watch::Sender<FeedView>,
}

impl ClientWorker {
    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
        mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                control = control_rx.recv() => {
                    match control {
                        Some(ControlMessage::SetSource(source_id)) => {
                            let commands = self.session.activate(source_id);
                            self.execute(commands);
                            self.finish_leaving();
                        }
                        Some(ControlMessage::SetViewerCount(viewer_count)) => {
                            self.session.set_viewer_count(viewer_count);
                        }
                        Some(ControlMessage::Shutdown) | None => {
                            tracing::info!("🛑 [CHAT_CLIENT] Shutdown requested");
                            let commands = self.session.teardown();
                            self.execute(commands);
                            self.finish_leaving();
                            self.publish();
                            break;
                        }
                    }
                }
                Some(event) = events_rx.recv() => {
                    let commands = self.session.handle(event, now_ms());
                    self.execute(commands);
                }
            }
            self.publish();
        }

        for (_, mut link) in self.links.drain() {
            link.close();
        }
        for (_, fetch) in self.fetches.drain() {
            fetch.abort();
        }
        tracing::info!("👋 [CHAT_CLIENT] Chat client stopped");
    }

    fn execute(&mut self, commands: Vec<SessionCommand>) {
        for command in commands {
            match command {
                SessionCommand::OpenTransport {
                    generation,
                    source_id,
                } => {
                    let link = self
                        .transport
                        .open(source_id, generation, self.events_tx.clone());
                    self.links.insert(generation, link);
                }
                SessionCommand::FetchSnapshot {
                    generation,
                    source_id,
                } => {
                    let snapshots = Arc::clone(&self.snapshots);
                    let events = self.events_tx.clone();
                    let fetch = tokio::spawn(async move {
                        let event = match snapshots.fetch_messages(&source_id).await {
                            Ok(messages) => InboundEvent::SnapshotFetched(messages),
                            Err(e) => InboundEvent::SnapshotFailed(e.to_string()),
                        };
                        let _ = events.send(SessionEvent::new(generation, event));
                    });
                    self.fetches.retain(|_, handle| !handle.is_finished());
                    self.fetches.insert(generation, fetch);
                }
                SessionCommand::Emit { generation, event } => match self.links.get(&generation) {
                    Some(link) => link.emit(event),
                    None => tracing::debug!(
                        generation = %generation,
                        "📭 [CHAT_CLIENT] No transport for generation, event dropped"
                    ),
                },
                SessionCommand::CloseTransport { generation } => {
                    if let Some(mut link) = self.links.remove(&generation) {
                        link.close();
                    }
                    if let Some(fetch) = self.fetches.remove(&generation) {
                        fetch.abort();
                    }
                }
            }
        }
    }

    /// 退出中の状態を一度公開してから`Idle`へ戻す
    fn finish_leaving(&mut self) {
        if self.session.phase() == SessionPhase::Leaving {
            self.publish();
            self.session.finish_leaving();
        }
    }

    fn publish(&self) {
        let view = self.session.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
