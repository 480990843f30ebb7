//! ユーティリティ関数

use crate::config::{ConfigManager, LogConfig};
use crate::error::{ChatfeedError, ChatfeedResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログ初期化
///
/// `RUST_LOG`が設定されていればそちらを優先する。ファイル出力が有効な場合は
/// 日次ローテーションのライターを追加し、そのガードを返す（破棄するとフラッシュされない）。
pub fn init_logging(config: &LogConfig) -> ChatfeedResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| ChatfeedError::Logging(e.to_string()))?;

    let (file_layer, guard) = if config.enable_file_logging {
        let log_dir = config
            .log_dir
            .clone()
            .or_else(ConfigManager::default_log_dir)
            .ok_or_else(|| ChatfeedError::Logging("No log directory available".to_string()))?;
        std::fs::create_dir_all(&log_dir).map_err(|e| {
            ChatfeedError::Logging(format!("Failed to create {}: {}", log_dir.display(), e))
        })?;

        let appender = tracing_appender::rolling::daily(&log_dir, "chatfeed.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| ChatfeedError::Logging(e.to_string()))?;

    Ok(guard)
}

/// 現在時刻（UNIXエポックからのミリ秒）
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// メッセージの1行表示
pub fn format_message_line(message: &crate::models::ChatMessage) -> String {
    let platform = message
        .platform
        .as_ref()
        .map(|p| format!("[{}] ", p))
        .unwrap_or_default();
    format!("{}{}: {}", platform, message.author_name, message.message_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, Platform};

    #[test]
    fn test_format_message_line() {
        let mut message = ChatMessage::text(Some("1"), "alice", "hello");
        assert_eq!(format_message_line(&message), "alice: hello");

        message.platform = Some(Platform::Twitch);
        assert_eq!(format_message_line(&message), "[twitch] alice: hello");
    }

    #[test]
    fn test_now_ms_is_recent() {
        // 2020-01-01 以降
        assert!(now_ms() > 1_577_836_800_000);
    }
}
