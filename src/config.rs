//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリを使用した設定ファイルの永続化と管理を提供します。

use crate::chat_management::{StoreConfig, SuppressionConfig};
use crate::error::ConfigError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// APIベースURLを上書きする環境変数
pub const API_URL_ENV: &str = "CHATFEED_API_URL";

/// リモートAPI設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// APIのベースURL（ライブトランスポートもここから導出）
    pub base_url: String,
    /// RESTリソースのパス接頭辞
    pub rest_path_prefix: String,
    /// RESTリクエストのタイムアウト（秒）
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.neustream.app".to_string(),
            rest_path_prefix: "/api".to_string(),
            request_timeout_secs: 15,
        }
    }
}

/// ライブトランスポート設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocketエンドポイントのパス
    pub ws_path: String,
    /// 再接続の初回待機（ミリ秒）
    pub reconnect_initial_delay_ms: u64,
    /// 再接続待機の上限（ミリ秒）
    pub reconnect_max_delay_ms: u64,
    /// 連続再接続の上限（Noneなら無制限）
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ws_path: "/chat/ws".to_string(),
            reconnect_initial_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: None,
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_file_logging: false,
            log_dir: None,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub suppression: SuppressionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 環境変数による上書きを適用
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                info!("🔧 API base URL overridden by {}: {}", API_URL_ENV, url);
                self.api.base_url = url.to_string();
            }
        }
    }
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDGディレクトリ配下の設定ファイルを使うマネージャーを作成
    pub fn new() -> Result<Self, ConfigError> {
        let project_dirs =
            ProjectDirs::from("app", "neustream", "chatfeed").ok_or(ConfigError::NoProjectDirs)?;
        Ok(Self::with_path(project_dirs.config_dir().join("config.toml")))
    }

    /// 任意のパスを使うマネージャーを作成
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        debug!("Config file path: {}", config_path.display());
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// XDGデータディレクトリ（ログ出力先の既定値）
    pub fn default_log_dir() -> Option<PathBuf> {
        ProjectDirs::from("app", "neustream", "chatfeed")
            .map(|dirs| dirs.data_local_dir().join("logs"))
    }

    /// 設定を読み込み（ファイルがなければ既定値）
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        if !self.config_path.exists() {
            info!(
                "Config file not found, using default settings: {}",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Io {
            path: self.config_path.clone(),
            source,
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.config_path.clone(),
            source,
        })?;

        info!(
            "✅ Configuration loaded from: {}",
            self.config_path.display()
        );
        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).map_err(|source| ConfigError::Io {
            path: self.config_path.clone(),
            source,
        })?;

        info!("💾 Configuration saved to: {}", self.config_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_management::{IdlessPolicy, RetentionPolicy};
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.toml"));

        let config = manager.load_config().unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.suppression.window_secs, 300);
        assert_eq!(config.suppression.staleness_secs, 600);
        assert_eq!(config.store.retention, RetentionPolicy::Unbounded);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("nested").join("config.toml"));

        let mut config = AppConfig::default();
        config.api.base_url = "http://localhost:3000".to_string();
        config.store.retention = RetentionPolicy::Recent(200);
        config.store.idless_policy = IdlessPolicy::Fingerprint;
        config.transport.max_reconnect_attempts = Some(5);

        manager.save_config(&config).unwrap();
        assert_eq!(manager.load_config().unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[api]\nbase_url = \"http://127.0.0.1:9000\"\n\n[store]\nretention = { recent = 50 }\n",
        )
        .unwrap();

        let config = ConfigManager::with_path(&path).load_config().unwrap();
        assert_eq!(config.api.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.api.request_timeout_secs, 15);
        assert_eq!(config.store.retention, RetentionPolicy::Recent(50));
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api = 12").unwrap();

        let err = ConfigManager::with_path(&path).load_config().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
