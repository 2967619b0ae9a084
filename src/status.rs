//! Status text shown on the controller surface.

use std::sync::Mutex;
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

/// Where the controller renders its transient status line.
pub trait StatusSink: Send + Sync {
    fn show(&self, message: &str, kind: StatusKind);

    /// Close the controller surface. Later calls to `show` are ignored.
    fn close(&self);
}

/// Spinner-backed status line on stderr.
pub struct TerminalStatus {
    quiet: bool,
    state: Mutex<TerminalState>,
}

#[derive(Default)]
struct TerminalState {
    spinner: Option<ProgressBar>,
    closed: bool,
}

impl TerminalStatus {
    pub fn new() -> Self {
        Self {
            quiet: false,
            state: Mutex::new(TerminalState::default()),
        }
    }

    /// Suppress all status output (used with `--json`).
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            state: Mutex::new(TerminalState::default()),
        }
    }

    fn spinner() -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }
}

impl Default for TerminalStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for TerminalStatus {
    fn show(&self, message: &str, kind: StatusKind) {
        if self.quiet {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.closed {
            return;
        }

        match kind {
            StatusKind::Info => {
                let spinner = state.spinner.get_or_insert_with(Self::spinner);
                spinner.set_message(message.to_string());
            }
            StatusKind::Success => {
                if let Some(spinner) = state.spinner.take() {
                    spinner.finish_and_clear();
                }
                eprintln!("{} {}", "✓".green(), message);
            }
            StatusKind::Error => {
                if let Some(spinner) = state.spinner.take() {
                    spinner.finish_and_clear();
                }
                eprintln!("{} {}", "✗".red(), message);
            }
        }
    }

    fn close(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(spinner) = state.spinner.take() {
            spinner.finish();
        }
        state.closed = true;
    }
}
