//! Read-only commands: get, compare, state.

use super::{driver, engine};
use crate::Context;
use crate::cli::CompareArgs;
use crate::ui;
use anyhow::{Result, bail};
use colored::Colorize;
use netconfig::{PersistedState, Scope, comparator};
use similar::{ChangeTag, TextDiff};

pub fn get(ctx: &Context, device: &str) -> Result<()> {
    let engine = engine(ctx)?;
    let mut driver = driver(&engine, device)?;
    let result = driver.get();
    driver.disconnect();
    println!("{}", result?);
    Ok(())
}

/// Print expected against live, line by line.
fn show_diff(expected: &str, observed: &str) {
    let diff = TextDiff::from_lines(expected, observed);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => print!("{}", format!("- {change}").red()),
            ChangeTag::Insert => print!("{}", format!("+ {change}").green()),
            ChangeTag::Equal => print!("{}", format!("  {change}").dimmed()),
        }
    }
}

pub fn compare(ctx: &Context, args: CompareArgs) -> Result<()> {
    let engine = engine(ctx)?;
    let mut driver = driver(&engine, &args.device)?;
    let scope = args.slice.map_or(Scope::Device, Scope::Slice);

    let result = driver.compare(&scope).and_then(|comparison| {
        if args.diff {
            let (live, state) = driver.snapshot()?;
            let (expected, observed) = comparator::side_by_side(&live, &state, &scope);
            ui::header(&format!("{} (expected / live)", args.device));
            show_diff(&expected, &observed);
        }
        Ok(comparison)
    });
    driver.disconnect();
    let comparison = result?;

    match comparison.mismatch {
        None => {
            ui::success(&format!("{}: live configuration matches", args.device));
            Ok(())
        }
        Some(mismatch) => bail!("{}: {mismatch}", args.device),
    }
}

pub fn state(ctx: &Context, device: &str) -> Result<()> {
    let engine = engine(ctx)?;
    if engine.device(device).is_none() {
        ui::warn(&format!("{device} is not in the configuration"));
    }
    let state = PersistedState::load(engine.store.as_ref(), device)?;
    if state.is_empty() {
        ui::dim(&format!("No persisted state for {device}"));
    }
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
