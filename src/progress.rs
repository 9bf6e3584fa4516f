//! Progress indicators for fleet runs.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use netconfig::fleet::{DeviceReport, FleetProgress};

/// Bar with one tick per device.
pub fn device_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(label.to_string());
    pb
}

/// Fleet progress shown on a bar; failures are printed above it.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(devices: usize) -> Self {
        Self {
            bar: device_bar(devices as u64, "Applying"),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl FleetProgress for BarProgress {
    fn on_device_start(&self, device: &str) {
        self.bar.set_message(device.to_string());
    }

    fn on_device_complete(&self, report: &DeviceReport) {
        let symbol = if report.is_success() {
            "✓".green()
        } else {
            self.bar
                .suspend(|| eprintln!("  {} {} failed", "✗".red(), report.device));
            "✗".red()
        };
        self.bar.set_message(format!("{symbol} {}", report.device));
        self.bar.inc(1);
    }
}
