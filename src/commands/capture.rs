use std::sync::Arc;

use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use crate::capture::CaptureOptions;
use crate::cdp::CdpHost;
use crate::cli::{Cli, OutputArgs};
use crate::commands::{effective_config, endpoint};
use crate::config::Config;
use crate::controller::{Dispatched, TriggerController};
use crate::error::{NodeshotError, Result};
use crate::page::{PageInput, SessionEvent};
use crate::relay::{DownloadDir, PersistenceRelay};
use crate::status::{StatusKind, StatusSink, TerminalStatus};

pub async fn pick(cli: &Cli, output: &OutputArgs) -> Result<()> {
    let config = effective_config(cli)?;
    let options = capture_options(&config, output);
    let (controller, status) = controller(cli, &config)?;

    let dispatched = controller.request_interactive_capture(options).await?;
    if !cli.json {
        println!(
            "{} Click an element in {} to capture it, Esc to cancel",
            "→".cyan(),
            dispatched.tab.url.dimmed()
        );
    }
    finish(cli, status.as_ref(), dispatched).await
}

pub async fn select(cli: &Cli, selector: &str, output: &OutputArgs) -> Result<()> {
    let config = effective_config(cli)?;
    let options = capture_options(&config, output);
    let (controller, status) = controller(cli, &config)?;

    let dispatched = controller.request_selector_capture(selector, options).await?;
    finish(cli, status.as_ref(), dispatched).await
}

/// Command-line flags over the `capture` config section.
fn capture_options(config: &Config, output: &OutputArgs) -> CaptureOptions {
    let defaults = config.capture_options();
    let format = output.format.unwrap_or(defaults.format());
    let quality = output
        .quality
        .map(|q| f64::from(q) / 100.0)
        .unwrap_or(defaults.quality());
    CaptureOptions::new(format, quality)
}

fn controller(
    cli: &Cli,
    config: &Config,
) -> Result<(TriggerController<CdpHost>, Arc<dyn StatusSink>)> {
    let download_dir = config.download_dir();
    tracing::debug!("Saving into {}", download_dir.display());
    let relay = PersistenceRelay::new(Arc::new(DownloadDir::new(download_dir))).spawn();

    let host = CdpHost::new(endpoint(config)?, relay).with_timings(config.timing.selection());
    let status: Arc<dyn StatusSink> = if cli.json {
        Arc::new(TerminalStatus::quiet())
    } else {
        Arc::new(TerminalStatus::new())
    };

    let controller = TriggerController::new(host, status.clone())
        .with_timings(config.timing.controller());
    Ok((controller, status))
}

/// Wait for the session to end. Ctrl-C cancels an open selection.
async fn finish(cli: &Cli, status: &dyn StatusSink, dispatched: Dispatched) -> Result<()> {
    let Dispatched {
        page, mut events, ..
    } = dispatched;

    let event = loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if event.is_terminal() => break event,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} session events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => {
                    return Err(NodeshotError::CommunicationFailure(
                        "Page context stopped before the capture finished".to_string(),
                    ));
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("Interrupted, cancelling selection");
                page.dispatch_input(PageInput::Key { key: "Escape".to_string() })?;
            }
        }
    };
    status.close();

    report(cli, event)
}

fn report(cli: &Cli, event: SessionEvent) -> Result<()> {
    match event {
        SessionEvent::Saved {
            filename,
            download_id,
            path,
        } => {
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "filename": filename,
                        "downloadId": download_id,
                        "path": path,
                    })
                );
            } else {
                println!(
                    "{} Screenshot saved: {}",
                    "✓".green(),
                    path.as_deref().unwrap_or(&filename)
                );
            }
            Ok(())
        }
        SessionEvent::Cancelled => {
            if cli.json {
                println!("{}", serde_json::json!({ "success": false, "cancelled": true }));
            } else {
                println!("{} Selection cancelled", "!".yellow());
            }
            Ok(())
        }
        SessionEvent::Failed { code, message } => {
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "success": false, "code": code, "error": message })
                );
            } else {
                eprintln!("{} {}", "✗".red(), message);
            }
            Err(NodeshotError::Other(message))
        }
        SessionEvent::SelectionStarted => Ok(()),
    }
}
