use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::TimeZone;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vigil_client::{AiClient, ApiClient};
use vigil_runtime::{AlertEngine, InsightEngine, SseSession};
use vigil_schema::StreamEvent;

#[derive(Parser)]
#[command(name = "vigil", version, about = "vigil security monitor console")]
struct Cli {
    #[arg(
        long,
        default_value = "http://127.0.0.1:8080",
        help = "Monitor backend base URL"
    )]
    base_url: String,

    #[arg(long, help = "Also write logs to daily files under this directory")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Tail the raw probe event stream")]
    Tail,
    #[command(about = "Show current alerts, or keep a live view")]
    Alerts {
        #[arg(long, short = 'w', help = "Keep polling and print new alerts")]
        watch: bool,
        #[arg(long, default_value = "5", help = "Poll interval in seconds")]
        interval: u64,
    },
    #[command(about = "Show AI sentinel insights, or follow the push channel")]
    Insights {
        #[arg(long, default_value = "50", help = "Snapshot size")]
        limit: usize,
        #[arg(long, short = 'w', help = "Follow the push channel")]
        watch: bool,
    },
    #[command(about = "Show system and probe statistics")]
    Stats,
    #[command(about = "List loaded detection rules")]
    Rules,
    #[command(about = "Interactive chat with the AI analyst")]
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    // keep the appender guard alive for the process lifetime
    let _guard;
    if let Some(log_dir) = &cli.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "vigil.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _guard = guard;
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .init();
    } else {
        registry.init();
    }

    let api = ApiClient::new(cli.base_url.clone());

    match cli.command {
        Commands::Tail => tail_events(&api).await?,
        Commands::Alerts { watch, interval } => {
            if watch {
                watch_alerts(api, Duration::from_secs(interval.max(1))).await?;
            } else {
                list_alerts(&api).await?;
            }
        }
        Commands::Insights { limit, watch } => {
            if watch {
                watch_insights(api).await?;
            } else {
                list_insights(&api, limit).await?;
            }
        }
        Commands::Stats => show_stats(&api).await?,
        Commands::Rules => list_rules(&api).await?,
        Commands::Chat => run_chat(api).await?,
    }

    Ok(())
}

async fn tail_events(api: &ApiClient) -> Result<()> {
    let mut session = SseSession::connect(reqwest::Client::new(), api.url("/api/stream"));
    eprintln!("Tailing {} (Ctrl-C to stop)...", api.url("/api/stream"));

    loop {
        tokio::select! {
            frame = session.frames.recv() => {
                let Some(frame) = frame else { break };
                if frame.event.as_deref() == Some("rules:reload") {
                    println!("-- rule set reloaded --");
                    continue;
                }
                match serde_json::from_value::<StreamEvent>(frame.data) {
                    Ok(event) => println!("{}", format_event(&event)),
                    Err(e) => tracing::debug!(error = %e, "skipping unknown frame"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    session.handle.release();
    Ok(())
}

fn format_event(event: &StreamEvent) -> String {
    let at = format_ms(event.timestamp());
    match event {
        StreamEvent::Exec {
            pid,
            comm,
            parent_comm,
            blocked,
            ..
        } => format!(
            "{at} exec    pid={pid:<7} {comm} (parent: {parent_comm}){}",
            if *blocked { " [BLOCKED]" } else { "" }
        ),
        StreamEvent::Connect {
            pid,
            addr,
            port,
            blocked,
            ..
        } => format!(
            "{at} connect pid={pid:<7} {addr}:{port}{}",
            if *blocked { " [BLOCKED]" } else { "" }
        ),
        StreamEvent::File {
            pid,
            filename,
            blocked,
            ..
        } => format!(
            "{at} file    pid={pid:<7} {filename}{}",
            if *blocked { " [BLOCKED]" } else { "" }
        ),
    }
}

async fn list_alerts(api: &ApiClient) -> Result<()> {
    let alerts = api.alerts().await?;
    if alerts.is_empty() {
        println!("No alerts.");
        return Ok(());
    }
    println!(
        "{:<26} {:<10} {:<24} {:<16} {:<8}",
        "TIME", "SEVERITY", "RULE", "PROCESS", "ACTION"
    );
    println!("{}", "-".repeat(88));
    for alert in &alerts {
        println!(
            "{:<26} {:<10} {:<24} {:<16} {:<8}",
            format_ms(alert.timestamp),
            alert.severity,
            alert.rule_name,
            alert.process_name,
            if alert.blocked { "blocked" } else { "alerted" },
        );
    }
    Ok(())
}

async fn watch_alerts(api: ApiClient, interval: Duration) -> Result<()> {
    let mut engine = AlertEngine::new(api, interval);
    if let Err(e) = engine.start().await {
        eprintln!("Initial alert fetch failed: {e} (will keep polling)");
    }
    let feed = engine.feed();
    eprintln!("Watching alerts (Ctrl-C to stop)...");

    let mut printed: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let feed = feed.lock().await;
                for alert in feed.alerts() {
                    if printed.insert(alert.id.clone()) {
                        println!(
                            "{} {:<10} {} ({}, pid {})",
                            format_ms(alert.timestamp),
                            alert.severity,
                            alert.rule_name,
                            alert.process_name,
                            alert.pid,
                        );
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    engine.stop();
    Ok(())
}

async fn list_insights(api: &ApiClient, limit: usize) -> Result<()> {
    let insights = api.insights(limit).await?;
    if insights.is_empty() {
        println!("No insights.");
        return Ok(());
    }
    for insight in &insights {
        println!(
            "[{:?}/{:?}] {} ({:.0}% confidence)",
            insight.kind,
            insight.severity,
            insight.title,
            insight.confidence * 100.0
        );
        println!("  {}", insight.summary);
        if !insight.actions.is_empty() {
            let labels: Vec<&str> = insight.actions.iter().map(|a| a.label.as_str()).collect();
            println!("  actions: {}", labels.join(", "));
        }
    }
    Ok(())
}

async fn watch_insights(api: ApiClient) -> Result<()> {
    let mut engine = InsightEngine::new(api);
    if let Err(e) = engine.start().await {
        eprintln!("Insight snapshot failed: {e} (push channel stays attached)");
    }
    let feed = engine.feed();
    eprintln!("Following insights (Ctrl-C to stop)...");

    let mut printed: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let feed = feed.lock().await;
                for insight in feed.insights() {
                    if printed.insert(insight.id.clone()) {
                        println!(
                            "{} [{:?}] {} — {}",
                            insight.created_at.to_rfc3339(),
                            insight.severity,
                            insight.title,
                            insight.summary,
                        );
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    engine.stop();
    Ok(())
}

async fn show_stats(api: &ApiClient) -> Result<()> {
    let stats = api.system_stats().await?;
    println!("Processes:    {}", stats.process_count);
    println!("Containers:   {}", stats.container_count);
    println!("Events/sec:   {}", stats.events_per_sec);
    println!("Alerts:       {}", stats.alert_count);
    println!("Probe status: {}", stats.probe_status);

    match api.probe_stats().await {
        Ok(probes) if !probes.is_empty() => {
            println!();
            println!(
                "{:<24} {:<8} {:<12} {:<12}",
                "PROBE", "ACTIVE", "EVENTS/S", "TOTAL"
            );
            println!("{}", "-".repeat(58));
            for probe in &probes {
                println!(
                    "{:<24} {:<8} {:<12} {:<12}",
                    probe.name,
                    if probe.active { "yes" } else { "no" },
                    probe.events_rate,
                    probe.total_count,
                );
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "probe stats unavailable"),
    }
    Ok(())
}

async fn list_rules(api: &ApiClient) -> Result<()> {
    let rules = api.rules().await?;
    if rules.is_empty() {
        println!("No rules loaded.");
        return Ok(());
    }
    println!("{:<28} {:<10} {:<8} {:<40}", "NAME", "SEVERITY", "ACTION", "DESCRIPTION");
    println!("{}", "-".repeat(90));
    for rule in &rules {
        println!(
            "{:<28} {:<10} {:<8} {:<40}",
            rule.name,
            rule.severity,
            rule.action,
            truncate(&rule.description, 38),
        );
    }
    Ok(())
}

async fn run_chat(api: ApiClient) -> Result<()> {
    let ai = AiClient::new(api);
    let mut session_id = format!("chat-{}", uuid_suffix());
    eprintln!("Chat with the AI analyst. /clear resets, /quit exits.");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match line.as_str() {
            "/quit" | "/exit" => break,
            "/clear" => {
                if let Err(e) = ai.api().clear_chat(&session_id).await {
                    tracing::warn!(error = %e, "failed to clear server-side history");
                }
                session_id = format!("chat-{}", uuid_suffix());
                println!("(conversation cleared)");
                continue;
            }
            _ => {}
        }

        let stream = match ai.chat_stream(&session_id, &line).await {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!("chat failed: {e}");
                continue;
            }
        };
        tokio::pin!(stream);

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(frame) => {
                    print!("{}", frame.content);
                    std::io::stdout().flush()?;
                    if let Some(sid) = frame.session_id {
                        session_id = sid;
                    }
                    if frame.done {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!();
                    eprintln!("stream failed: {e}");
                    break;
                }
            }
        }
        println!();
    }
    Ok(())
}

fn uuid_suffix() -> String {
    // the client-side id only needs to be unique until the server issues one
    uuid::Uuid::new_v4().to_string()
}

fn format_ms(ms: i64) -> String {
    chrono::Utc
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Char-boundary-safe truncation; server text may carry multibyte content.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
