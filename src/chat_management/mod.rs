pub mod connection_status; // プラットフォーム別接続状態
pub mod feed; // 描画用フィード投影
pub mod message_store; // 重複排除ストア
pub mod suppression; // 接続通知の抑制キャッシュ

pub use connection_status::{ConnectionStatusBoard, PlatformStatus};
pub use feed::{FeedProjection, FeedView};
pub use message_store::{
    AppendOutcome, IdlessPolicy, MessageStore, MessageStoreStats, RetentionPolicy, StoreConfig,
    StoredMessage,
};
pub use suppression::{
    match_connection_notice, SuppressionCache, SuppressionConfig, SuppressionKey, Verdict,
};
