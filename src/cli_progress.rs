/*!
 * CLI progress renderer for interactive terminal display
 *
 * Drains a [`ProgressReporter`](crate::ProgressReporter) channel and renders
 * it as an indicatif bar with transfer rate and ETA.
 */

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::core::progress::{DirectoryProgress, ProgressEvent, TransferProgress};

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Renders progress events for one command
pub struct CliProgressRenderer {
    bar: ProgressBar,
    label: String,
}

impl CliProgressRenderer {
    /// Create a renderer; `visible = false` renders nothing
    pub fn new(label: impl Into<String>, visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(BAR_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        let label = label.into();
        bar.set_message(label.clone());
        Self { bar, label }
    }

    /// Render events until every reporter handle is dropped
    pub fn spawn(self, mut events: UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(event);
            }
            self.bar.finish();
        })
    }

    fn handle_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Transfer(progress) => self.on_transfer(&progress),
            ProgressEvent::Directory(progress) => self.on_directory(&progress),
            ProgressEvent::FileCompleted { key, bytes, .. } => {
                self.bar
                    .println(format!("  ✓ {} ({})", key, format_bytes(bytes)));
            }
        }
    }

    fn on_transfer(&self, progress: &TransferProgress) {
        if let Some(total) = progress.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(progress.transferred);
    }

    fn on_directory(&self, progress: &DirectoryProgress) {
        self.bar.set_length(progress.total_bytes);
        self.bar.set_position(progress.transferred);
        let current = progress
            .current
            .as_ref()
            .map(|file| format!(" - {}", file.key))
            .unwrap_or_default();
        self.bar.set_message(format!(
            "{} [{}/{} files]{}",
            self.label, progress.files_done, progress.total_files, current
        ));
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let base = 1024.0_f64;
    let exp = (bytes_f.ln() / base.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);

    let value = bytes_f / base.powi(exp as i32);

    if exp == 0 {
        format!("{} {}", bytes, UNITS[exp])
    } else {
        format!("{:.2} {}", value, UNITS[exp])
    }
}
