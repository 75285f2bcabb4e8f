use anyhow::{bail, Context};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use vitalguard::{Config, Monitor, MonitorCommand, Reading};

const USAGE: &str = "Usage: vitalguard <config.yaml> [readings.jsonl]";

/// One line of driver input
enum Input {
    Reading(Reading),
    Mute,
    Escalate,
    Status,
    Wait(Duration),
}

fn parse_line(line: &str) -> anyhow::Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line.starts_with('{') {
        let reading = Reading::from_json(line).context("invalid reading")?;
        return Ok(Some(Input::Reading(reading)));
    }

    let mut words = line.split_whitespace();
    let input = match (words.next(), words.next()) {
        (Some("mute"), None) => Input::Mute,
        (Some("escalate"), None) => Input::Escalate,
        (Some("status"), None) => Input::Status,
        (Some("wait"), Some(ms)) => {
            let ms: u64 = ms.parse().context("wait expects milliseconds")?;
            Input::Wait(Duration::from_millis(ms))
        }
        _ => bail!("unknown command '{}'", line),
    };
    Ok(Some(input))
}

async fn apply(monitor: &mut Monitor, input: Input) -> anyhow::Result<()> {
    match input {
        Input::Reading(reading) => {
            monitor.record(reading);
        }
        Input::Mute => monitor.handle_command(MonitorCommand::Mute),
        Input::Escalate => match monitor.escalation() {
            Some(escalation) => {
                let outcome = escalation.send()?;
                println!("{}", outcome.message.body);
                if let Some(dispatch) = outcome.dispatch {
                    match dispatch.await.context("dispatch task failed")? {
                        Ok(receipt) => info!("Delivered to {}", receipt.destination),
                        Err(e) => error!("Escalation not delivered: {}", e),
                    }
                }
            }
            None => warn!(
                "Escalation is only available in Emergency (current: {})",
                monitor.assessment().severity
            ),
        },
        Input::Status => {
            println!("{}", serde_json::to_string(&monitor.status())?);
        }
        Input::Wait(duration) => tokio::time::sleep(duration).await,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vitalguard=info")),
        )
        .init();

    info!("VITALGUARD v{} starting", vitalguard::VERSION);

    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(path) => path,
        None => bail!(USAGE),
    };
    let readings_path = args.next();

    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    let mut monitor = Monitor::new(&config).context("failed to start monitor")?;

    let source: Box<dyn AsyncRead + Unpin + Send> = match &readings_path {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(source).lines();
    info!(
        "Reading input from {}",
        readings_path.as_deref().unwrap_or("stdin")
    );

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut line_no: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
            line = lines.next_line() => {
                let line = match line.context("failed to read input")? {
                    Some(line) => line,
                    None => break,
                };
                line_no += 1;
                match parse_line(&line) {
                    Ok(Some(input)) => {
                        if let Err(e) = apply(&mut monitor, input).await {
                            error!("Line {}: {:#}", line_no, e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Line {} skipped: {:#}", line_no, e),
                }
            }
        }
    }

    monitor.shutdown();

    let stats = monitor.stats();
    info!(
        "Final stats: {} readings, {} alarms, {} mutes, {} escalations, {} tone loops, uptime: {}s",
        stats.readings_processed,
        stats.alarms_started,
        stats.mutes,
        stats.escalations,
        stats.tone_loops_spawned,
        stats.uptime_secs
    );

    Ok(())
}
