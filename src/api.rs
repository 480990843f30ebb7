pub mod protocol; // ライブトランスポートのワイヤ形式
pub mod rest; // RESTスナップショット取得
pub mod transport; // WebSocketトランスポート

pub use rest::{RestClient, SnapshotSource};
pub use transport::{Transport, TransportLink, WebSocketTransport};
