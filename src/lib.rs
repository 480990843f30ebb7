pub mod api;
pub mod chat_management;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod utils;

// Re-export the main error types for convenience
pub use error::{ChatfeedError, ChatfeedResult, ConfigError, FetchError, TransportError};

// Re-export the host-facing surface
pub use client::{ChatClient, ChatClientHandle};
pub use config::{AppConfig, ConfigManager};
pub use models::{ChatMessage, MessageId, MessageType, Platform, SourceId};
pub use session::{ChatSession, Generation, InboundEvent, SessionCommand, SessionEvent, SessionPhase};

// Re-export chat management types
pub use chat_management::{
    FeedView, IdlessPolicy, MessageStore, RetentionPolicy, StoreConfig, SuppressionCache,
    SuppressionConfig, Verdict,
};
