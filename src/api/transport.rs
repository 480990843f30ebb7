//! ライブトランスポート
//!
//! ソースごとに1本のWebSocket接続を張り、受信フレームを世代タグ付きの
//! [`SessionEvent`]としてセッション駆動タスクへ流す。
//! 接続が切れた場合はトランスポート自身が指数バックオフで再接続し、
//! 再接続のたびに`Connected`を通知する（再参加はセッション側が行う）。
//! 再接続の上限に達した場合は`TransportClosed`を通知してタスクを終える。

use crate::api::protocol::{ClientEvent, ServerEvent};
use crate::config::{ApiConfig, TransportConfig};
use crate::error::TransportError;
use crate::models::SourceId;
use crate::session::{Generation, InboundEvent, SessionEvent};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// トランスポートの生成元
pub trait Transport: Send + Sync {
    /// ソースへの接続を開始する
    ///
    /// 接続確立は非同期に行われ、結果は`events`へ`generation`付きで届く。
    fn open(
        &self,
        source_id: SourceId,
        generation: Generation,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Box<dyn TransportLink>;
}

/// 開いている1本の接続
pub trait TransportLink: Send {
    /// イベントを送る（応答は待たない）
    fn emit(&self, event: ClientEvent);

    /// 接続を閉じる。送信待ちのイベントは可能な限り送ってから閉じる
    fn close(&mut self);
}

/// tokio-tungstenite によるWebSocketトランスポート
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    endpoint: String,
    config: TransportConfig,
}

impl WebSocketTransport {
    pub fn new(api: &ApiConfig, config: &TransportConfig) -> Result<Self, TransportError> {
        let base = websocket_base_url(&api.base_url)?;
        let path = config.ws_path.trim();
        let endpoint = if path.is_empty() {
            base
        } else {
            format!("{}/{}", base, path.trim_start_matches('/'))
        };

        Ok(Self {
            endpoint,
            config: config.clone(),
        })
    }

    /// ソース用の接続URL
    pub fn url_for(&self, source_id: &SourceId) -> String {
        format!(
            "{}?sourceId={}",
            self.endpoint,
            urlencoding::encode(source_id.as_str())
        )
    }
}

impl Transport for WebSocketTransport {
    fn open(
        &self,
        source_id: SourceId,
        generation: Generation,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Box<dyn TransportLink> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        let worker = LinkWorker {
            url: self.url_for(&source_id),
            source_id,
            generation,
            config: self.config.clone(),
            events,
        };
        let handle = tokio::spawn(worker.run(outbound_rx, shutdown_rx));

        Box::new(WebSocketLink {
            outbound: outbound_tx,
            shutdown_sender: Some(shutdown_tx),
            handle,
        })
    }
}

/// [`WebSocketTransport`]が開いた接続
pub struct WebSocketLink {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    shutdown_sender: Option<mpsc::UnboundedSender<()>>,
    handle: JoinHandle<()>,
}

impl WebSocketLink {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl TransportLink for WebSocketLink {
    fn emit(&self, event: ClientEvent) {
        if self.outbound.send(event).is_err() {
            tracing::debug!("📭 [TRANSPORT] Link task already finished, event dropped");
        }
    }

    fn close(&mut self) {
        if let Some(shutdown_sender) = self.shutdown_sender.take() {
            let _ = shutdown_sender.send(());
        }
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.close();
    }
}

enum SocketExit {
    Shutdown,
    Lost,
}

struct LinkWorker {
    url: String,
    source_id: SourceId,
    generation: Generation,
    config: TransportConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl LinkWorker {
    fn notify(&self, event: InboundEvent) -> bool {
        self.events
            .send(SessionEvent::new(self.generation, event))
            .is_ok()
    }

    async fn run(
        self,
        mut outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
        mut shutdown_rx: mpsc::UnboundedReceiver<()>,
    ) {
        tracing::info!(
            "🔌 [TRANSPORT] Link started (source: {}, generation: {})",
            self.source_id,
            self.generation
        );

        let mut attempts: u32 = 0;
        loop {
            let connected = tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((stream, _)) => {
                    attempts = 0;
                    tracing::info!("✅ [TRANSPORT] Connected to {}", self.url);
                    if !self.notify(InboundEvent::Connected) {
                        break;
                    }

                    let exit = self
                        .drive_socket(stream, &mut outbound_rx, &mut shutdown_rx)
                        .await;
                    if matches!(exit, SocketExit::Shutdown) {
                        break;
                    }

                    if !self.notify(InboundEvent::Disconnected) {
                        break;
                    }
                    // 切断中の送信は破棄する（再接続後にセッションが参加し直す）
                    while outbound_rx.try_recv().is_ok() {}
                }
                Err(e) => {
                    tracing::warn!("❌ [TRANSPORT] Connection to {} failed: {}", self.url, e);
                    if !self.notify(InboundEvent::TransportError(e.to_string())) {
                        break;
                    }
                }
            }

            attempts += 1;
            if let Some(max) = self.config.max_reconnect_attempts {
                if attempts > max {
                    let error = TransportError::ReconnectExhausted { attempts: max };
                    tracing::error!("🚨 [TRANSPORT] {}", error);
                    self.notify(InboundEvent::TransportClosed(error.to_string()));
                    break;
                }
            }

            let delay = reconnect_delay(&self.config, attempts);
            tracing::info!(
                "⏳ [TRANSPORT] Reconnecting in {:?} (attempt {})",
                delay,
                attempts
            );
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(
            "🛑 [TRANSPORT] Link stopped (source: {}, generation: {})",
            self.source_id,
            self.generation
        );
    }

    async fn drive_socket<S>(
        &self,
        stream: tokio_tungstenite::WebSocketStream<S>,
        outbound_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
        shutdown_rx: &mut mpsc::UnboundedReceiver<()>,
    ) -> SocketExit
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    // 退出通知などの送信待ちを流してから閉じる
                    while let Ok(event) = outbound_rx.try_recv() {
                        if let Ok(json) = event.encode() {
                            if write.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return SocketExit::Shutdown;
                }
                Some(event) = outbound_rx.recv() => {
                    let json = match event.encode() {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("❌ [TRANSPORT] Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    tracing::debug!("📤 [TRANSPORT] Sending: {}", json);
                    if let Err(e) = write.send(Message::Text(json)).await {
                        tracing::warn!("❌ [TRANSPORT] Send failed: {}", e);
                        self.notify(InboundEvent::TransportError(e.to_string()));
                        return SocketExit::Lost;
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.dispatch(&text),
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                return SocketExit::Lost;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("🔌 [TRANSPORT] Socket closed by server");
                            return SocketExit::Lost;
                        }
                        Some(Err(e)) => {
                            tracing::warn!("❌ [TRANSPORT] Socket error: {}", e);
                            self.notify(InboundEvent::TransportError(e.to_string()));
                            return SocketExit::Lost;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    fn dispatch(&self, frame: &str) {
        match ServerEvent::decode(frame) {
            Ok(event) => {
                if let Some(inbound) = inbound_event(event) {
                    self.notify(inbound);
                }
            }
            Err(e) => {
                tracing::warn!("⚠️ [TRANSPORT] Malformed frame ignored: {}", e);
            }
        }
    }
}

/// サーバーイベントをセッションイベントへ変換する
pub fn inbound_event(event: ServerEvent) -> Option<InboundEvent> {
    match event {
        ServerEvent::JoinedChat(ack) => Some(InboundEvent::JoinedAck(ack)),
        ServerEvent::ChatHistory(messages) => Some(InboundEvent::HistorySnapshot(messages)),
        ServerEvent::NewMessages(messages) => Some(InboundEvent::NewMessages(messages)),
        ServerEvent::Error(message) => Some(InboundEvent::TransportError(message)),
        ServerEvent::Unknown(name) => {
            tracing::debug!("❓ [TRANSPORT] Unknown event ignored: {}", name);
            None
        }
    }
}

/// `http(s)://` を `ws(s)://` に置き換える
pub fn websocket_base_url(base_url: &str) -> Result<String, TransportError> {
    let base = base_url.trim().trim_end_matches('/');
    let converted = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else {
        return Err(TransportError::InvalidUrl(base_url.to_string()));
    };
    Ok(converted)
}

/// `attempts`回目の再接続前の待機時間
pub fn reconnect_delay(config: &TransportConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(20);
    let delay_ms = config
        .reconnect_initial_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.reconnect_max_delay_ms);
    Duration::from_millis(delay_ms)
}
