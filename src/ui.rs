//! Terminal output — progress bar and colored summary.
//!
//! Uses `indicatif` for the batch progress bar and `console` for color.
//! [`BatchProgress`] tracks a running batch visually in the terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::Outcome;
use crate::stats::StatsSnapshot;

/// Visual progress for one batch run.
pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Refresh the bar from a stats snapshot.
    pub fn update(&self, snap: &StatsSnapshot) {
        self.pb.set_position(snap.succeeded + snap.failed);
        let mut msg = format!("{} in flight", snap.in_flight);
        if snap.retried > 0 {
            msg.push_str(&format!(
                ", {} {}",
                self.yellow.apply_to("retries:"),
                snap.retried
            ));
        }
        self.pb.set_message(msg);
    }

    /// Clear the bar and print the final per-batch summary.
    pub fn finish(&self, snap: &StatsSnapshot) {
        self.pb.finish_and_clear();
        println!(
            "  {} {} succeeded, {} failed, {} retries in {:.1}s ({:.2} docs/s)",
            if snap.failed == 0 {
                self.green.apply_to("✓")
            } else {
                self.yellow.apply_to("!")
            },
            snap.succeeded,
            snap.failed,
            snap.retried,
            snap.elapsed_ms as f64 / 1000.0,
            snap.throughput,
        );
        if snap.failed > 0 {
            let kinds = &snap.failed_by_kind;
            println!(
                "    {} transient: {}, rate limited: {}, malformed: {}, service: {}",
                self.red.apply_to("failures:"),
                kinds.transient_network,
                kinds.rate_limited,
                kinds.malformed_response,
                kinds.service_error,
            );
        }
    }

    /// List each failed document with its kind and message.
    pub fn print_failures(&self, filenames: &[String], outcomes: &[Outcome]) {
        for (filename, outcome) in filenames.iter().zip(outcomes) {
            if let Outcome::Failure { kind, message } = outcome {
                println!(
                    "  {} {filename}: {kind}: {message}",
                    self.red.apply_to("✗")
                );
            }
        }
    }
}
