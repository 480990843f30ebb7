//! チャットクライアントの統合テスト
//!
//! 偽のトランスポートとスナップショット取得元で駆動タスクを動かし、
//! ソース切り替え・重複排除・抑制・後始末の振る舞いを確認する。

use async_trait::async_trait;
use chatfeed::api::protocol::ClientEvent;
use chatfeed::api::{SnapshotSource, Transport, TransportLink};
use chatfeed::{
    AppConfig, ChatClient, ChatClientHandle, ChatMessage, FeedView, FetchError, Generation,
    InboundEvent, SessionEvent, SessionPhase, SourceId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

#[derive(Default)]
struct TransportLog {
    opened: Vec<(SourceId, Generation)>,
    senders: HashMap<Generation, mpsc::UnboundedSender<SessionEvent>>,
    emitted: Vec<(Generation, ClientEvent)>,
    closed: Vec<Generation>,
}

#[derive(Clone, Default)]
struct FakeTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl FakeTransport {
    fn opened(&self) -> Vec<(SourceId, Generation)> {
        self.log.lock().opened.clone()
    }

    fn emitted(&self) -> Vec<(Generation, ClientEvent)> {
        self.log.lock().emitted.clone()
    }

    fn closed(&self) -> Vec<Generation> {
        self.log.lock().closed.clone()
    }

    fn generation_of(&self, index: usize) -> Generation {
        self.log.lock().opened[index].1
    }

    /// 閉じた後のリンクからも送れる（遅延到着の再現用）
    fn inject(&self, generation: Generation, event: InboundEvent) {
        let sender = self.log.lock().senders.get(&generation).cloned();
        sender
            .expect("transport was opened for generation")
            .send(SessionEvent::new(generation, event))
            .unwrap();
    }
}

impl Transport for FakeTransport {
    fn open(
        &self,
        source_id: SourceId,
        generation: Generation,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Box<dyn TransportLink> {
        let mut log = self.log.lock();
        log.opened.push((source_id, generation));
        log.senders.insert(generation, events);
        Box::new(FakeLink {
            generation,
            log: Arc::clone(&self.log),
        })
    }
}

struct FakeLink {
    generation: Generation,
    log: Arc<Mutex<TransportLog>>,
}

impl TransportLink for FakeLink {
    fn emit(&self, event: ClientEvent) {
        self.log.lock().emitted.push((self.generation, event));
    }

    fn close(&mut self) {
        self.log.lock().closed.push(self.generation);
    }
}

#[derive(Default)]
struct FakeSnapshots {
    messages: Mutex<HashMap<String, Vec<ChatMessage>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<SourceId>>,
}

impl FakeSnapshots {
    fn with(self, source: &str, messages: Vec<ChatMessage>) -> Self {
        self.messages.lock().insert(source.to_string(), messages);
        self
    }

    fn gated(self, source: &str, gate: Arc<Notify>) -> Self {
        self.gates.lock().insert(source.to_string(), gate);
        self
    }

    fn calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SnapshotSource for FakeSnapshots {
    async fn fetch_messages(&self, source_id: &SourceId) -> Result<Vec<ChatMessage>, FetchError> {
        self.calls.lock().push(source_id.clone());

        let gate = self.gates.lock().get(source_id.as_str()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if source_id.as_str() == "broken" {
            return Err(FetchError::Status {
                status: 503,
                url: "http://test/broken".to_string(),
            });
        }

        Ok(self
            .messages
            .lock()
            .get(source_id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

fn source(raw: &str) -> SourceId {
    SourceId::parse(raw).unwrap()
}

fn texts(view: &FeedView) -> Vec<String> {
    view.messages.iter().map(|m| m.message_text.clone()).collect()
}

fn start(transport: &FakeTransport, snapshots: FakeSnapshots) -> (ChatClientHandle, Arc<FakeSnapshots>) {
    let snapshots = Arc::new(snapshots);
    let client = ChatClient::spawn(
        &AppConfig::default(),
        Arc::new(transport.clone()),
        Arc::clone(&snapshots) as Arc<dyn SnapshotSource>,
    );
    (client, snapshots)
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

async fn wait_for_view(client: &ChatClientHandle, what: &str, condition: impl Fn(&FeedView) -> bool) -> FeedView {
    let mut rx = client.subscribe();
    let result = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            {
                let view = rx.borrow_and_update();
                if condition(&view) {
                    return (*view).clone();
                }
            }
            if rx.changed().await.is_err() {
                panic!("client stopped while waiting for {}", what);
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

#[tokio::test]
async fn test_activation_joins_room_after_connect() {
    let transport = FakeTransport::default();
    let (client, snapshots) = start(
        &transport,
        FakeSnapshots::default().with("a", vec![ChatMessage::text(Some("1"), "x", "hello")]),
    );

    client.set_source(Some(source("a"))).unwrap();
    eventually("transport open", || transport.opened().len() == 1).await;
    let generation = transport.generation_of(0);

    let view = wait_for_view(&client, "snapshot", |v| !v.messages.is_empty()).await;
    assert_eq!(texts(&view), vec!["hello"]);
    assert_eq!(view.phase, SessionPhase::Connecting);
    assert!(!view.is_connected);
    assert_eq!(snapshots.calls(), 1);

    transport.inject(generation, InboundEvent::Connected);
    eventually("join emitted", || {
        transport.emitted()
            == vec![(
                generation,
                ClientEvent::JoinChat {
                    source_id: source("a"),
                },
            )]
    })
    .await;

    transport.inject(generation, InboundEvent::JoinedAck(serde_json::json!({"sourceId": "a"})));
    let view = wait_for_view(&client, "joined", |v| v.is_connected).await;
    assert_eq!(view.phase, SessionPhase::Joined);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_same_source_does_not_reconnect() {
    let transport = FakeTransport::default();
    let (client, snapshots) = start(&transport, FakeSnapshots::default());

    client.set_source(Some(source("a"))).unwrap();
    client.set_source(Some(source("a"))).unwrap();
    client.set_source(Some(source(" a "))).unwrap();
    client.set_viewer_count(7).unwrap();

    wait_for_view(&client, "viewer count", |v| v.viewer_count == 7).await;
    eventually("snapshot fetch", || snapshots.calls() == 1).await;
    assert_eq!(transport.opened().len(), 1);
    assert!(transport.closed().is_empty());
    assert_eq!(snapshots.calls(), 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_live_messages_are_deduplicated() {
    let transport = FakeTransport::default();
    let (client, _) = start(
        &transport,
        FakeSnapshots::default().with("a", vec![ChatMessage::text(Some("1"), "x", "snap")]),
    );

    client.set_source(Some(source("a"))).unwrap();
    wait_for_view(&client, "snapshot", |v| texts(v) == vec!["snap"]).await;
    let generation = transport.generation_of(0);

    transport.inject(
        generation,
        InboundEvent::NewMessages(vec![
            ChatMessage::text(Some("1"), "x", "snap"),
            ChatMessage::text(Some("2"), "y", "live"),
        ]),
    );
    transport.inject(
        generation,
        InboundEvent::NewMessages(vec![ChatMessage::text(Some("2"), "y", "live")]),
    );
    transport.inject(
        generation,
        InboundEvent::NewMessages(vec![ChatMessage::text(Some("3"), "z", "later")]),
    );

    let view = wait_for_view(&client, "live messages", |v| v.messages.len() == 3).await;
    assert_eq!(texts(&view), vec!["snap", "live", "later"]);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_history_event_replaces_feed() {
    let transport = FakeTransport::default();
    let (client, _) = start(
        &transport,
        FakeSnapshots::default().with("a", vec![ChatMessage::text(Some("1"), "x", "snap")]),
    );

    client.set_source(Some(source("a"))).unwrap();
    wait_for_view(&client, "snapshot", |v| texts(v) == vec!["snap"]).await;
    let generation = transport.generation_of(0);

    transport.inject(
        generation,
        InboundEvent::HistorySnapshot(vec![
            ChatMessage::text(Some("10"), "x", "h1"),
            ChatMessage::text(Some("11"), "y", "h2"),
        ]),
    );

    let view = wait_for_view(&client, "history", |v| texts(v) == vec!["h1", "h2"]).await;
    assert_eq!(view.messages.len(), 2);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connection_notices_are_suppressed_but_tracked() {
    let transport = FakeTransport::default();
    let (client, _) = start(
        &transport,
        FakeSnapshots::default().with("a", vec![ChatMessage::text(Some("1"), "x", "snap")]),
    );

    client.set_source(Some(source("a"))).unwrap();
    wait_for_view(&client, "snapshot", |v| texts(v) == vec!["snap"]).await;
    let generation = transport.generation_of(0);

    transport.inject(
        generation,
        InboundEvent::NewMessages(vec![
            ChatMessage::system(Some("s1"), "Connected to Twitch chat"),
            ChatMessage::system(Some("s2"), "Connected to Twitch chat"),
            ChatMessage::text(Some("2"), "y", "after"),
        ]),
    );

    let view = wait_for_view(&client, "live batch", |v| v.messages.len() == 2).await;
    assert_eq!(texts(&view), vec!["snap", "after"]);
    assert_eq!(view.suppressed, 2);

    let (platform, status) = &view.platform_status[0];
    assert_eq!(platform, "twitch");
    assert!(status.connected);
    assert_eq!(status.method.as_deref(), Some("irc"));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_source_switch_isolates_sessions() {
    let transport = FakeTransport::default();
    let gate = Arc::new(Notify::new());
    let (client, _) = start(
        &transport,
        FakeSnapshots::default()
            .with("a", vec![ChatMessage::text(Some("a1"), "x", "from A")])
            .with("b", vec![ChatMessage::text(Some("b1"), "y", "from B")])
            .gated("b", Arc::clone(&gate)),
    );

    client.set_source(Some(source("a"))).unwrap();
    wait_for_view(&client, "snapshot A", |v| texts(v) == vec!["from A"]).await;
    let generation_a = transport.generation_of(0);
    transport.inject(generation_a, InboundEvent::Connected);

    client.set_source(Some(source("b"))).unwrap();
    eventually("transport B open", || transport.opened().len() == 2).await;
    let generation_b = transport.generation_of(1);

    // Aは退出してから閉じられる
    assert_eq!(transport.closed(), vec![generation_a]);
    let emitted = transport.emitted();
    assert!(emitted.contains(&(
        generation_a,
        ClientEvent::LeaveChat {
            source_id: source("a")
        }
    )));

    let view = wait_for_view(&client, "empty feed for B", |v| {
        v.source_id == Some(source("b")) && v.messages.is_empty()
    })
    .await;
    assert_eq!(view.phase, SessionPhase::Connecting);

    // 切り替え後に届いたAのイベントは無視される
    transport.inject(
        generation_a,
        InboundEvent::NewMessages(vec![ChatMessage::text(Some("a2"), "x", "late A")]),
    );
    transport.inject(
        generation_a,
        InboundEvent::SnapshotFetched(vec![ChatMessage::text(Some("a0"), "x", "stale A")]),
    );
    transport.inject(
        generation_b,
        InboundEvent::NewMessages(vec![ChatMessage::text(Some("b2"), "y", "live B")]),
    );

    let view = wait_for_view(&client, "live B", |v| !v.messages.is_empty()).await;
    assert_eq!(texts(&view), vec!["live B"]);

    // Bのスナップショットが遅れて届くとライブ分を上書きする
    gate.notify_one();
    let view = wait_for_view(&client, "snapshot B", |v| texts(v) == vec!["from B"]).await;
    assert_eq!(view.source_id, Some(source("b")));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_failure_keeps_live_feed() {
    let transport = FakeTransport::default();
    let (client, snapshots) = start(&transport, FakeSnapshots::default());

    client.set_source(Some(source("broken"))).unwrap();
    eventually("snapshot attempt", || snapshots.calls() == 1).await;
    let generation = transport.generation_of(0);

    transport.inject(generation, InboundEvent::Connected);
    transport.inject(generation, InboundEvent::JoinedAck(serde_json::Value::Null));
    transport.inject(
        generation,
        InboundEvent::NewMessages(vec![ChatMessage::text(Some("1"), "x", "live")]),
    );

    let view = wait_for_view(&client, "live message", |v| !v.messages.is_empty()).await;
    assert_eq!(texts(&view), vec!["live"]);
    assert!(view.is_connected);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_then_reconnect_rejoins() {
    let transport = FakeTransport::default();
    let (client, _) = start(&transport, FakeSnapshots::default());

    client.set_source(Some(source("a"))).unwrap();
    eventually("transport open", || transport.opened().len() == 1).await;
    let generation = transport.generation_of(0);

    transport.inject(generation, InboundEvent::Connected);
    transport.inject(generation, InboundEvent::JoinedAck(serde_json::Value::Null));
    wait_for_view(&client, "joined", |v| v.is_connected).await;

    transport.inject(generation, InboundEvent::Disconnected);
    let view = wait_for_view(&client, "disconnected", |v| !v.is_connected).await;
    assert_eq!(view.source_id, Some(source("a")));

    transport.inject(generation, InboundEvent::Connected);
    eventually("second join", || {
        transport
            .emitted()
            .iter()
            .filter(|(_, event)| matches!(event, ClientEvent::JoinChat { .. }))
            .count()
            == 2
    })
    .await;
    assert_eq!(transport.opened().len(), 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deactivation_and_shutdown_leave_room() {
    let transport = FakeTransport::default();
    let (client, _) = start(
        &transport,
        FakeSnapshots::default().with("a", vec![ChatMessage::text(Some("1"), "x", "snap")]),
    );

    client.set_source(Some(source("a"))).unwrap();
    wait_for_view(&client, "snapshot", |v| !v.messages.is_empty()).await;
    let generation = transport.generation_of(0);

    client.set_source(None).unwrap();
    let view = wait_for_view(&client, "idle", |v| {
        v.source_id.is_none() && v.phase == SessionPhase::Idle
    })
    .await;
    assert!(view.messages.is_empty());
    assert_eq!(view.phase, SessionPhase::Idle);
    assert_eq!(transport.closed(), vec![generation]);

    client.set_source(Some(source("c"))).unwrap();
    eventually("transport C open", || transport.opened().len() == 2).await;
    let generation_c = transport.generation_of(1);

    client.shutdown().await.unwrap();
    assert_eq!(transport.closed(), vec![generation, generation_c]);
    assert!(transport.emitted().contains(&(
        generation_c,
        ClientEvent::LeaveChat {
            source_id: source("c")
        }
    )));
}

#[tokio::test]
async fn test_stopped_transport_goes_idle_and_same_source_reopens() {
    let transport = FakeTransport::default();
    let (client, snapshots) = start(&transport, FakeSnapshots::default());

    client.set_source(Some(source("a"))).unwrap();
    eventually("transport open", || transport.opened().len() == 1).await;
    let generation = transport.generation_of(0);
    transport.inject(generation, InboundEvent::Connected);
    transport.inject(generation, InboundEvent::JoinedAck(serde_json::Value::Null));
    wait_for_view(&client, "joined", |v| v.is_connected).await;

    transport.inject(
        generation,
        InboundEvent::TransportClosed("Gave up reconnecting after 5 attempts".to_string()),
    );
    let view = wait_for_view(&client, "stopped", |v| v.phase == SessionPhase::Idle).await;
    assert!(!view.is_connected);
    assert_eq!(view.source_id, Some(source("a")));
    assert_eq!(transport.closed(), vec![generation]);

    // 同じソースの再指定で開き直す
    client.set_source(Some(source("a"))).unwrap();
    eventually("transport reopened", || transport.opened().len() == 2).await;
    let reopened = transport.generation_of(1);
    assert!(reopened > generation);
    assert_eq!(transport.opened()[1].0, source("a"));
    eventually("second snapshot", || snapshots.calls() == 2).await;

    let view = wait_for_view(&client, "connecting", |v| v.phase == SessionPhase::Connecting).await;
    assert_eq!(view.source_id, Some(source("a")));

    // 再指定がもう一度来ても開き直さない
    client.set_source(Some(source("a"))).unwrap();
    client.set_viewer_count(3).unwrap();
    wait_for_view(&client, "viewer count", |v| v.viewer_count == 3).await;
    assert_eq!(transport.opened().len(), 2);

    client.shutdown().await.unwrap();
}
