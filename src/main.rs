use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use modscan::config::ScanConfig;
use modscan::llm::{Scanner, create_transport};
use modscan::pipeline::dedupe::DedupeCache;
use modscan::pipeline::stores::MemoryStore;
use modscan::pipeline::types::InboundMessage;
use modscan::pipeline::{MessageProcessor, ProcessOutcome, ScanQueue};

const CLI_GUILD: &str = "cli-guild";
const CLI_CHANNEL: &str = "cli-channel";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("MODSCAN_LOG_LEVEL")
        .ok()
        .and_then(|level| tracing_subscriber::EnvFilter::try_new(level).ok())
        .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = ScanConfig::from_env().context("Failed to load configuration")?;

    eprintln!("🛡️  modscan v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {}", config.llm.backend.as_str());
    eprintln!(
        "   Concurrency: {}, queue capacity: {}",
        config.queue.concurrency, config.queue.capacity
    );
    eprintln!("   Flag threshold: {}", config.flag_threshold);
    eprintln!("   Type a message (or a JSON message object) and press Enter.");
    eprintln!("   /stats shows queue state, /auto on|off toggles auto-mode, /quit exits.\n");

    let transport = create_transport(&config.llm, config.request_timeout)
        .context("Failed to create model transport")?;
    let store = Arc::new(MemoryStore::new());
    let scanner = Arc::new(
        Scanner::new(transport, config.request_timeout).with_prompt_store(store.clone()),
    );

    if let Err(e) = scanner.health_check().await {
        tracing::warn!(error = %e, "Provider health check failed; scans may fail");
    }

    let queue = ScanQueue::new(scanner, config.queue, config.retry);
    let dedupe = Arc::new(DedupeCache::new(config.dedupe_ttl, config.dedupe_max_entries));
    let processor = MessageProcessor::new(queue.clone(), dedupe, store.clone(), store.clone())
        .with_flag_threshold(config.flag_threshold);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut counter: u64 = 0;
    eprint!("> ");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }

        match line {
            "/quit" => break,
            "/stats" => {
                println!("{}", serde_json::to_string(&queue.stats())?);
            }
            "/auto on" | "/auto off" => {
                store.set_auto_mode(CLI_GUILD, line.ends_with("on")).await;
                eprintln!("auto-mode {}", if line.ends_with("on") { "enabled" } else { "disabled" });
            }
            _ => {
                counter += 1;
                let message = parse_line(line, counter);
                let outcome = processor.process(&message).await;
                println!("{}", render(&outcome));
            }
        }
        eprint!("> ");
    }

    queue.drain().await;
    Ok(())
}

/// JSON objects are taken as full messages; anything else is plain text
/// posted to the CLI guild.
fn parse_line(line: &str, counter: u64) -> InboundMessage {
    if line.starts_with('{') {
        match serde_json::from_str::<InboundMessage>(line) {
            Ok(message) => return message,
            Err(e) => tracing::warn!(error = %e, "Not a message object, scanning as text"),
        }
    }
    InboundMessage::new(
        format!("cli-{counter}"),
        Some(CLI_GUILD),
        CLI_CHANNEL,
        "cli-user",
        line,
    )
}

fn render(outcome: &ProcessOutcome) -> serde_json::Value {
    match outcome {
        ProcessOutcome::Skipped(reason) => serde_json::json!({ "skipped": reason }),
        ProcessOutcome::Scanned(report) => serde_json::json!({
            "message_id": report.message_id,
            "situation": report.situation,
            "success": report.result.success,
            "retried": report.result.retried,
            "error": report.result.error,
            "rejection": report.result.rejection,
            "attempts": report.result.attempts,
            "queue_ms": report.result.queue_time.as_millis() as u64,
            "process_ms": report.result.process_time.as_millis() as u64,
            "flagged": report.flagged,
            "auto_action": report.auto_action,
            "severity": report.severity,
            "response": report.result.response,
        }),
    }
}
