//! Progress reporting for the tracker
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::track::{TrackSummary, TrackerStats};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::{Duration, Instant};

/// Progress reporter that displays tracker status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,

    /// Run start, for the throughput display
    started: Instant,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            started: Instant::now(),
        }
    }

    /// Update the progress display from the live counters
    pub fn update(&self, stats: &TrackerStats) {
        let dirs = stats.dirs_opened();
        let files = stats.files_dispatched();
        let bytes_str = format_size(stats.bytes_seen(), BINARY);

        let secs = self.started.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            (dirs + files) as f64 / secs
        } else {
            0.0
        };

        let mut msg = format!(
            "Dirs: {} | Files: {} | Size: {} | Rate: {:.0}/s",
            format_number(dirs),
            format_number(files),
            bytes_str,
            rate,
        );
        let errors = stats.errors();
        if errors > 0 {
            msg.push_str(&format!(" | Errors: {}", format_number(errors)));
        }

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the run
pub fn print_summary(summary: &TrackSummary, root: &Path) {
    let bytes_str = format_size(summary.bytes_seen, BINARY);

    println!();
    println!("{}", style("Tracking Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Directories:").bold(),
        format_number(summary.dirs_opened)
    );
    if summary.dirs_skipped > 0 {
        println!(
            "  {} {}",
            style("Skipped:").bold(),
            format_number(summary.dirs_skipped)
        );
    }
    println!(
        "  {} {}",
        style("Files:").bold(),
        format_number(summary.files_dispatched)
    );
    println!("  {} {}", style("Total Size:").bold(), bytes_str);
    println!(
        "  {} {:.1}s ({:.0} items/sec)",
        style("Duration:").bold(),
        summary.duration.as_secs_f64(),
        summary.items_per_second()
    );
    if summary.errors > 0 {
        println!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(summary.errors)
        );
    }
    println!("  {} {}", style("Root:").bold(), root.display());
    println!();
}

/// Print a header at the start of the run
pub fn print_header(root: &Path, file_tokens: usize, sidecar_name: &str) {
    println!();
    println!(
        "{} {}",
        style("dirmeta").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Root:").bold(), root.display());
    println!("  {} {}", style("Tokens:").bold(), file_tokens);
    println!("  {} {}", style("Sidecar:").bold(), sidecar_name);
    println!();
}
