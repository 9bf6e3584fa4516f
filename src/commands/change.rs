//! Single-device change commands: compile, update, delete, reserve, enable.

use super::{ChangeFile, confirm, driver, engine, load_change};
use crate::Context;
use crate::cli::{ChangeArgs, CompileArgs, FileArgs};
use crate::paths;
use crate::ui;
use anyhow::{Context as _, Result, bail};
use netconfig::{Compiled, DesiredChange, Operation, Outcome, ServiceDriver};
use std::fs;
use std::path::PathBuf;

fn print_compiled(change: &DesiredChange, operation: Operation, compiled: &Compiled) {
    ui::header(&format!("{} {} on {}", operation, change.service, change.device));
    if compiled.batch.is_empty() {
        ui::info("Nothing to send");
        return;
    }
    for (index, directive) in compiled.batch.iter().enumerate() {
        ui::directive(index, directive);
    }
}

pub fn compile(ctx: &Context, args: CompileArgs) -> Result<()> {
    let (change, operation) = load_change(&args.change.file)?.resolve(args.change.operation);
    let engine = engine(ctx)?;
    let driver = driver(&engine, &change.device)?;

    let compiled = driver.compile(&change, operation)?;
    print_compiled(&change, operation, &compiled);

    if args.groups && !compiled.groups.is_empty() {
        ui::section("Groups");
        for decision in &compiled.groups {
            ui::kv(
                &decision.key.to_string(),
                &format!(
                    "{:?} ({} present, {} in request)",
                    decision.verdict, decision.present, decision.delta
                ),
            );
        }
    }

    if args.encoded && !compiled.batch.is_empty() {
        let vendor = engine
            .device(&change.device)
            .map(|profile| profile.vendor)
            .unwrap_or_default();
        ui::section(&format!("Encoded ({vendor})"));
        println!("{}", vendor.adapter().encode(&compiled.batch));
    }
    Ok(())
}

/// Preview, confirm, run `op` on the driver and report the result code.
fn run_change<F>(ctx: &Context, change: &DesiredChange, operation: Operation, verb: &str, op: F) -> Result<()>
where
    F: FnOnce(&mut ServiceDriver) -> netconfig::Result<()>,
{
    let engine = engine(ctx)?;
    let mut driver = driver(&engine, &change.device)?;

    let compiled = driver.compile(change, operation)?;
    if !ctx.quiet {
        print_compiled(change, operation, &compiled);
    }
    if !compiled.batch.is_empty()
        && !confirm(
            ctx,
            &format!("{verb} {} directives on {}?", compiled.batch.len(), change.device),
        )?
    {
        ui::info("Cancelled");
        return Ok(());
    }

    let result = op(&mut driver);
    driver.disconnect();
    ui::outcome(&change.device, Outcome::of(&result));
    result.with_context(|| format!("{verb} {} on {}", change.service, change.device))
}

pub fn update(ctx: &Context, args: ChangeArgs) -> Result<()> {
    let (change, operation) = load_change(&args.file)?.resolve(args.operation);
    run_change(ctx, &change, operation, "Apply", |driver| driver.update(&change, operation))
}

pub fn delete(ctx: &Context, args: FileArgs) -> Result<()> {
    let (change, _) = load_change(&args.file)?.resolve(None);
    run_change(ctx, &change, Operation::Delete, "Delete", |driver| driver.delete(&change))
}

// ============================================================================
// Reservations
// ============================================================================

fn reservation_file(device: &str) -> Result<PathBuf> {
    Ok(paths::reservations_dir()?.join(format!("{device}.json")))
}

fn load_reservations(device: &str) -> Result<Vec<ChangeFile>> {
    let path = reservation_file(device)?;
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path).with_context(|| format!("Could not read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid reservation file {}", path.display()))
}

fn save_reservations(device: &str, changes: &[ChangeFile]) -> Result<()> {
    let path = reservation_file(device)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(changes)?)
        .with_context(|| format!("Could not write {}", path.display()))?;
    log::debug!("Saved {} reserved changes to {}", changes.len(), path.display());
    Ok(())
}

fn resolved(changes: &[ChangeFile]) -> Vec<(DesiredChange, Operation)> {
    changes.iter().cloned().map(|file| file.resolve(None)).collect()
}

pub fn reserve(ctx: &Context, args: ChangeArgs) -> Result<()> {
    let (change, operation) = load_change(&args.file)?.resolve(args.operation);
    let mut reserved = load_reservations(&change.device)?;
    let earlier = resolved(&reserved);

    run_change(ctx, &change, operation, "Reserve", |driver| {
        if !earlier.is_empty() {
            driver.resume_reservation(&earlier)?;
        }
        driver.reserve(&change, operation)
    })?;

    reserved.push(ChangeFile::new(change.clone(), operation));
    save_reservations(&change.device, &reserved)?;
    ui::dim(&format!(
        "Run `fabricctl enable {}` to keep it; {} reserved changes pending",
        change.device,
        reserved.len()
    ));
    Ok(())
}

pub fn enable(ctx: &Context, device: &str) -> Result<()> {
    let reserved = load_reservations(device)?;
    if reserved.is_empty() {
        ui::warn(&format!("No reservation recorded for {device}; confirming anyway"));
    }

    let engine = engine(ctx)?;
    let mut driver = driver(&engine, device)?;
    let result = driver
        .resume_reservation(&resolved(&reserved))
        .and_then(|()| driver.enable());
    driver.disconnect();
    ui::outcome(device, Outcome::of(&result));
    if let Err(err) = result {
        bail!("enable on {device} failed: {err}");
    }

    let path = reservation_file(device)?;
    if path.exists() {
        fs::remove_file(&path).with_context(|| format!("Could not remove {}", path.display()))?;
    }
    ui::success(&format!("{} reserved changes persisted", reserved.len()));
    Ok(())
}
