use anyhow::Context;
use chatfeed::{
    config::ConfigManager, utils, ChatClient, FeedView, IdlessPolicy, RetentionPolicy, SourceId,
};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::WatchStream, StreamExt};

/// 配信ソースのライブチャットを購読して表示する
#[derive(Parser, Debug)]
#[command(name = "chatfeed", version, about)]
struct Args {
    /// 購読するソースID（標準入力から1行ずつ切り替え可能、空行で切断）
    #[arg(short, long)]
    source: Option<String>,

    /// APIのベースURL
    #[arg(long)]
    api_url: Option<String>,

    /// 設定ファイルのパス
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ログレベル
    #[arg(long)]
    log_level: Option<String>,

    /// 直近N件のみ保持する
    #[arg(long)]
    retention: Option<usize>,

    /// ID無しメッセージを内容から重複排除する
    #[arg(long)]
    fingerprint_idless: bool,

    /// メッセージをJSON Linesで出力する
    #[arg(long)]
    json: bool,

    /// 引数を反映した設定を保存する
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_manager = match &args.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let mut config = config_manager.load_config().unwrap_or_else(|e| {
        eprintln!("設定読み込みエラー、デフォルト設定を使用: {}", e);
        Default::default()
    });
    config.apply_env_overrides();

    if let Some(api_url) = &args.api_url {
        config.api.base_url = api_url.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.log.log_level = log_level.clone();
    }
    if let Some(limit) = args.retention {
        config.store.retention = RetentionPolicy::Recent(limit);
    }
    if args.fingerprint_idless {
        config.store.idless_policy = IdlessPolicy::Fingerprint;
    }

    // tokio-consoleの初期化（プロファイリング用）
    #[cfg(feature = "debug-tokio")]
    let _guard: Option<()> = {
        console_subscriber::init();
        None
    };

    #[cfg(not(feature = "debug-tokio"))]
    let _guard = utils::init_logging(&config.log)?;

    if args.save_config {
        config_manager
            .save_config(&config)
            .context("Failed to save configuration")?;
    }

    tracing::info!("🎬 Starting chatfeed ({})", config.api.base_url);

    let client = ChatClient::connect(&config)?;
    client.set_source(args.source.as_deref().and_then(SourceId::parse))?;

    let mut views = WatchStream::new(client.subscribe());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = FeedPrinter::new(args.json);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 終了シグナルを受信しました");
                break;
            }
            view = views.next() => match view {
                Some(view) => printer.print(&view, &mut std::io::stdout().lock())?,
                None => break,
            },
            line = stdin.next_line() => match line {
                Ok(Some(line)) => {
                    let source_id = SourceId::parse(&line);
                    tracing::info!("🔀 Switching source to {:?}", source_id.as_ref().map(SourceId::as_str));
                    client.set_source(source_id)?;
                }
                Ok(None) => {
                    // 標準入力が閉じてもシグナルまで購読を続ける
                    tokio::signal::ctrl_c().await?;
                    break;
                }
                Err(e) => {
                    tracing::warn!("❌ Failed to read stdin: {}", e);
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    client.shutdown().await?;
    tracing::info!("👋 chatfeed shutting down");
    Ok(())
}

/// フィードの差分を書き出す
///
/// 受理番号で追跡するため、保持件数の上限で先頭が落ちても新着だけを書く。
struct FeedPrinter {
    json: bool,
    source_id: Option<SourceId>,
    last_seq: Option<u64>,
    connected: bool,
}

impl FeedPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            source_id: None,
            last_seq: None,
            connected: false,
        }
    }

    fn print(&mut self, view: &FeedView, out: &mut impl Write) -> anyhow::Result<()> {
        if view.source_id != self.source_id {
            self.source_id = view.source_id.clone();
            self.last_seq = None;
        }

        if view.is_connected != self.connected {
            self.connected = view.is_connected;
            let status = if view.is_connected { "Connected" } else { "Connecting" };
            eprintln!("-- {} --", status);
        }

        for (seq, message) in view.seqs.iter().zip(&view.messages) {
            if self.last_seq.is_some_and(|last| *seq <= last) {
                continue;
            }
            if self.json {
                writeln!(out, "{}", serde_json::to_string(message)?)?;
            } else {
                writeln!(out, "{}", utils::format_message_line(message))?;
            }
            self.last_seq = Some(*seq);
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatfeed::ChatMessage;

    fn view(source: &str, entries: &[(u64, &str)]) -> FeedView {
        FeedView {
            source_id: SourceId::parse(source),
            seqs: entries.iter().map(|(seq, _)| *seq).collect(),
            messages: entries
                .iter()
                .map(|(seq, text)| {
                    ChatMessage::text(Some(seq.to_string().as_str()), "viewer", text)
                })
                .collect(),
            ..FeedView::default()
        }
    }

    fn printed_texts(out: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|line| line.rsplit(": ").next().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_full_window_prints_only_new_messages() {
        let mut printer = FeedPrinter::new(false);
        let mut out = Vec::new();

        printer.print(&view("1", &[(0, "m1"), (1, "m2")]), &mut out).unwrap();
        // 直近2件の保持で先頭が押し出されても件数は変わらない
        printer.print(&view("1", &[(1, "m2"), (2, "m3")]), &mut out).unwrap();
        printer.print(&view("1", &[(2, "m3"), (3, "m4")]), &mut out).unwrap();

        assert_eq!(printed_texts(&out), vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_replaced_feed_is_printed_again() {
        let mut printer = FeedPrinter::new(false);
        let mut out = Vec::new();

        printer.print(&view("1", &[(0, "a"), (1, "b")]), &mut out).unwrap();
        // 履歴の置き換えでは同じ件数でも新しい受理番号が振られる
        printer.print(&view("1", &[(2, "h1"), (3, "h2")]), &mut out).unwrap();

        assert_eq!(printed_texts(&out), vec!["a", "b", "h1", "h2"]);
    }

    #[test]
    fn test_unchanged_view_prints_nothing() {
        let mut printer = FeedPrinter::new(true);
        let mut out = Vec::new();

        let feed = view("1", &[(0, "a")]);
        printer.print(&feed, &mut out).unwrap();
        printer.print(&feed, &mut out).unwrap();

        let lines: Vec<_> = String::from_utf8(out).unwrap().lines().map(String::from).collect();
        assert_eq!(lines.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(json["messageText"], "a");
    }

    #[test]
    fn test_source_switch_restarts_tracking() {
        let mut printer = FeedPrinter::new(false);
        let mut out = Vec::new();

        printer.print(&view("1", &[(5, "old")]), &mut out).unwrap();
        printer.print(&view("2", &[(3, "new")]), &mut out).unwrap();

        assert_eq!(printed_texts(&out), vec!["old", "new"]);
    }
}
