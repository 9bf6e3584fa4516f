//! `fabricctl recover node|slices`: rebuild changes from persisted state.

use super::{ChangeFile, confirm, driver, engine};
use crate::Context;
use crate::cli::{RecoverArgs, RecoverCommand};
use crate::ui;
use anyhow::{Context as _, Result, bail};
use netconfig::recovery::QosOverride;
use netconfig::{Operation, PersistedState, RecoveryKind, RecoveryReport, RecoveryRequest};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Recovery options read from `--request`.
///
/// ```json
/// {"rename": {"swp1": "swp9"},
///  "qos_overrides": [{"if_name": "swp9", "vlan_id": 100, "inflow_rate": "50M"}],
///  "slices": ["blue"]}
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestFile {
    #[serde(default)]
    rename: BTreeMap<String, String>,
    #[serde(default)]
    qos_overrides: Vec<QosOverride>,
    #[serde(default)]
    slices: Vec<String>,
}

fn parse_rename(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((old, new)) if !old.is_empty() && !new.is_empty() => Ok((old.to_string(), new.to_string())),
        _ => bail!("invalid rename {pair:?}, expected OLD=NEW"),
    }
}

fn read_request_file(path: &Path) -> Result<RequestFile> {
    let content = fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid recovery request {}", path.display()))
}

/// Build the request; command-line renames and slices add to the file's.
fn build_request(kind: RecoveryKind, args: &RecoverArgs) -> Result<RecoveryRequest> {
    let file = match &args.request {
        Some(path) => read_request_file(path)?,
        None => RequestFile::default(),
    };

    let mut request = RecoveryRequest::new(args.device.clone(), kind);
    request.rename = file.rename;
    for pair in &args.renames {
        let (old, new) = parse_rename(pair)?;
        request.rename.insert(old, new);
    }
    request.qos_overrides = file.qos_overrides;
    request.slices = file.slices;
    request.slices.extend(args.slices.iter().cloned());
    request.slices.sort();
    request.slices.dedup();
    Ok(request)
}

fn print_failures(report: &RecoveryReport) {
    for (label, err) in &report.failed {
        ui::error(&format!("{label}: {err}"));
    }
}

pub fn run(ctx: &Context, command: RecoverCommand) -> Result<()> {
    let (kind, args) = match command {
        RecoverCommand::Node(args) => (RecoveryKind::Node, args),
        RecoverCommand::Slices(args) => (RecoveryKind::Slices, args),
    };
    let request = build_request(kind, &args)?;
    let engine = engine(ctx)?;

    if !args.apply {
        let snapshot = PersistedState::load(engine.store.as_ref(), &request.device)?;
        let report = netconfig::recover(&request, &snapshot);
        let files: Vec<ChangeFile> = report
            .recovered
            .iter()
            .map(|item| ChangeFile::new(item.change.clone(), Operation::Merge))
            .collect();
        println!("{}", serde_json::to_string_pretty(&files)?);
        print_failures(&report);
        if !report.failed.is_empty() {
            bail!("{} items could not be recovered", report.failed.len());
        }
        return Ok(());
    }

    if !confirm(
        ctx,
        &format!("Push recovered configuration to {}? It must be blank for what is rebuilt", request.device),
    )? {
        ui::info("Cancelled");
        return Ok(());
    }

    let mut driver = driver(&engine, &request.device)?;
    let result = driver.recover(&request);
    driver.disconnect();
    let report = result?;

    for item in &report.recovered {
        let label = item.change.slice_name.as_deref().unwrap_or(&request.device);
        ui::success(&format!("{label}: recovered"));
    }
    print_failures(&report);
    if !report.failed.is_empty() {
        bail!("{} items could not be recovered", report.failed.len());
    }
    Ok(())
}
