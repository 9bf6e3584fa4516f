pub mod change;
pub mod fleet;
pub mod inspect;
pub mod recover;

use crate::Context;
use crate::cli::OperationArg;
use crate::config::Config;
use anyhow::{Context as _, Result};
use netconfig::{DesiredChange, Operation, ProcessSessionFactory, ServiceDriver};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// A change file: a desired change with an optional request operation.
///
/// ```json
/// {"operation": "merge", "device": "leaf1", "service": "l2_slice", "slice_name": "blue",
///  "cps": [{"if_name": "swp1", "vlan_id": 100}]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(flatten)]
    pub change: DesiredChange,
}

impl ChangeFile {
    pub fn new(change: DesiredChange, operation: Operation) -> Self {
        Self {
            operation: Some(operation),
            change,
        }
    }

    /// Request operation: the command line wins over the file, merge by default.
    pub fn resolve(self, arg: Option<OperationArg>) -> (DesiredChange, Operation) {
        let operation = arg
            .map(Operation::from)
            .or(self.operation)
            .unwrap_or(Operation::Merge);
        (self.change, operation)
    }
}

/// Read and parse a change file.
pub fn load_change(path: &Path) -> Result<ChangeFile> {
    let content = fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid change file {}", path.display()))
}

/// Load the configuration and build the engine context.
pub fn engine(ctx: &Context) -> Result<netconfig::Context> {
    Config::load(ctx.config.as_deref())?.into_context()
}

/// Driver for a configured device, speaking over the profile's command.
pub fn driver(engine: &netconfig::Context, device: &str) -> Result<ServiceDriver> {
    Ok(ServiceDriver::for_device(engine, device, Arc::new(ProcessSessionFactory))?)
}

/// Ask before touching devices, unless `--yes` was given.
pub fn confirm(ctx: &Context, prompt: &str) -> Result<bool> {
    if ctx.yes {
        return Ok(true);
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}
