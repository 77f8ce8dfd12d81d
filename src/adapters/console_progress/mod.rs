//! Terminal progress sink
//!
//! Renders "Processing file i of n" on an `indicatif` bar and prints the
//! aggregate notifications when the batch completes.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

use crate::domain::model::*;
use crate::ports::*;

pub const FIXED_MESSAGE: &str = "GIF format fixed";
pub const FIX_FAILED_MESSAGE: &str = "GIF format fix failed";

/// Progress bar on stderr
pub struct ConsoleProgressAdapter {
    bar: Mutex<Option<ProgressBar>>,
    hidden: bool,
}

impl ConsoleProgressAdapter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            hidden: false,
        }
    }

    /// No bar is drawn; used when stderr is not a terminal
    pub fn hidden() -> Self {
        Self {
            bar: Mutex::new(None),
            hidden: true,
        }
    }

    fn bar_for(&self, total: usize) -> ProgressBar {
        let mut slot = self.bar.lock().unwrap_or_else(|p| p.into_inner());
        slot.get_or_insert_with(|| {
            let bar = if self.hidden {
                ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::hidden())
            } else {
                ProgressBar::new(total as u64)
            };
            if let Ok(style) =
                ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {percent:>3}% {msg}")
            {
                bar.set_style(style.progress_chars("##-"));
            }
            bar
        })
        .clone()
    }

    /// Summary lines for a finished batch, in emission order
    pub fn summary_lines(summary: &BatchSummary) -> Vec<&'static str> {
        let mut lines = Vec::new();
        if summary.had_success {
            lines.push(FIXED_MESSAGE);
        }
        if summary.had_failure {
            lines.push(FIX_FAILED_MESSAGE);
        }
        lines
    }
}

impl Default for ConsoleProgressAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressPort for ConsoleProgressAdapter {
    fn on_progress(&self, snapshot: &BatchSnapshot) {
        let bar = self.bar_for(snapshot.total);
        bar.set_length(snapshot.total as u64);
        bar.set_position(snapshot.current.saturating_sub(1) as u64);
        bar.set_message(format!(
            "Processing file {} of {}",
            snapshot.current, snapshot.total
        ));
    }

    fn on_summary(&self, summary: &BatchSummary) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|p| p.into_inner()).take() {
            bar.set_position(bar.length().unwrap_or(0));
            bar.finish_and_clear();
        }
        for line in Self::summary_lines(summary) {
            debug!(message = line, "Batch summary");
            eprintln!("{}", line);
        }
    }
}

/// Progress sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressPort for NullProgress {
    fn on_progress(&self, _snapshot: &BatchSnapshot) {}

    fn on_summary(&self, _summary: &BatchSummary) {}
}
