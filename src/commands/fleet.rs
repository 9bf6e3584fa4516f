//! `fabricctl apply`: many change files, one worker per device.

use super::{confirm, engine, load_change};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::BarProgress;
use crate::ui;
use anyhow::{Result, bail};
use colored::Colorize;
use netconfig::fleet::{self, ChangeStatus, Job};
use netconfig::ProcessSessionFactory;
use std::sync::Arc;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let changes = args
        .files
        .iter()
        .map(|path| load_change(path).map(|file| file.resolve(args.operation)))
        .collect::<Result<Vec<_>>>()?;
    let jobs = Job::group(changes);

    let mut engine = engine(ctx)?;
    if let Some(workers) = args.jobs {
        engine.settings.jobs = workers;
    }

    ui::header("Fleet apply");
    for job in &jobs {
        ui::kv(&job.device, &format!("{} changes", job.changes.len()));
    }
    if !confirm(ctx, &format!("Apply to {} devices?", jobs.len()))? {
        ui::info("Cancelled");
        return Ok(());
    }

    let progress = BarProgress::new(jobs.len());
    let report = fleet::run(&engine, &jobs, Arc::new(ProcessSessionFactory), &progress);
    progress.finish();

    for device in &report.devices {
        ui::section(&device.device);
        for change in &device.changes {
            match &change.status {
                ChangeStatus::Applied => println!("  {} {}", "✓".green(), change.label),
                ChangeStatus::Failed(err) => println!("  {} {}: {}", "✗".red(), change.label, err),
                ChangeStatus::Skipped => ui::dim(&format!("- {} (skipped)", change.label)),
            }
        }
    }

    println!();
    if report.is_success() {
        ui::success(&format!("{} devices updated", report.devices.len()));
        Ok(())
    } else {
        bail!("{} of {} devices failed", report.failed(), report.devices.len())
    }
}
