//! Concurrent execution across devices.
//!
//! Every device gets its own worker, its own [`ServiceDriver`] and its own
//! session; workers share nothing but the state store. Changes for one
//! device run in order, and the first failure skips the rest of that
//! device's changes without affecting other devices.

use crate::context::Context;
use crate::driver::{ServiceDriver, SessionFactory};
use crate::error::{Error, Outcome};
use crate::model::{DesiredChange, Operation};
use rayon::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};

/// Ordered changes for one device.
#[derive(Debug, Clone)]
pub struct Job {
    /// Device name
    pub device: String,
    /// Changes with their request operation
    pub changes: Vec<(DesiredChange, Operation)>,
}

impl Job {
    /// One job per device, keeping the order in which changes were given.
    pub fn group(changes: Vec<(DesiredChange, Operation)>) -> Vec<Job> {
        let mut jobs: Vec<Job> = Vec::new();
        for (change, op) in changes {
            match jobs.iter_mut().find(|job| job.device == change.device) {
                Some(job) => job.changes.push((change, op)),
                None => jobs.push(Job {
                    device: change.device.clone(),
                    changes: vec![(change, op)],
                }),
            }
        }
        jobs
    }
}

/// What happened to one change.
#[derive(Debug)]
pub enum ChangeStatus {
    /// Committed and persisted
    Applied,
    /// Failed; later changes of the device were skipped
    Failed(Error),
    /// Not attempted
    Skipped,
}

impl ChangeStatus {
    /// Result code, `None` when skipped.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Applied => Some(Outcome::Ok),
            Self::Failed(err) => Some(err.outcome()),
            Self::Skipped => None,
        }
    }
}

/// Per-change line of a device report.
#[derive(Debug)]
pub struct ChangeReport {
    /// `service[/slice] operation`
    pub label: String,
    /// Status
    pub status: ChangeStatus,
}

/// Result of one device's job.
#[derive(Debug)]
pub struct DeviceReport {
    /// Device name
    pub device: String,
    /// One entry per change, in order
    pub changes: Vec<ChangeReport>,
}

impl DeviceReport {
    /// Whether every change was applied.
    pub fn is_success(&self) -> bool {
        self.changes.iter().all(|c| matches!(c.status, ChangeStatus::Applied))
    }
}

/// Result of a fleet run, sorted by device name.
#[derive(Debug, Default)]
pub struct FleetReport {
    /// Device reports
    pub devices: Vec<DeviceReport>,
}

impl FleetReport {
    /// Number of devices with at least one change not applied.
    pub fn failed(&self) -> usize {
        self.devices.iter().filter(|d| !d.is_success()).count()
    }

    /// Whether every device applied every change.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Progress notifications, called from worker threads.
pub trait FleetProgress: Sync {
    /// A worker started on a device.
    fn on_device_start(&self, device: &str);

    /// A worker finished a device.
    fn on_device_complete(&self, report: &DeviceReport);
}

/// Progress sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl FleetProgress for NoProgress {
    fn on_device_start(&self, _device: &str) {}

    fn on_device_complete(&self, _report: &DeviceReport) {}
}

fn label(change: &DesiredChange, op: Operation) -> String {
    match change.slice_name.as_deref() {
        Some(slice) if !slice.is_empty() => format!("{}/{slice} {op}", change.service),
        _ => format!("{} {op}", change.service),
    }
}

fn skipped(changes: &[(DesiredChange, Operation)]) -> Vec<ChangeReport> {
    changes
        .iter()
        .map(|(change, op)| ChangeReport {
            label: label(change, *op),
            status: ChangeStatus::Skipped,
        })
        .collect()
}

fn run_job(ctx: &Context, job: &Job, factory: &Arc<dyn SessionFactory>) -> DeviceReport {
    let mut driver = match ServiceDriver::for_device(ctx, &job.device, Arc::clone(factory)) {
        Ok(driver) => driver,
        Err(err) => {
            log::error!("{err}");
            let mut changes = skipped(&job.changes);
            if let Some(first) = changes.first_mut() {
                first.status = ChangeStatus::Failed(err);
            }
            return DeviceReport {
                device: job.device.clone(),
                changes,
            };
        }
    };

    let mut changes = Vec::with_capacity(job.changes.len());
    let mut failed = false;
    for (change, op) in &job.changes {
        let status = if failed || ctx.cancel.is_cancelled() {
            ChangeStatus::Skipped
        } else {
            match driver.update(change, *op) {
                Ok(()) => ChangeStatus::Applied,
                Err(err) => {
                    log::error!("{}: {} failed: {err}", job.device, label(change, *op));
                    failed = true;
                    ChangeStatus::Failed(err)
                }
            }
        };
        changes.push(ChangeReport {
            label: label(change, *op),
            status,
        });
    }
    driver.disconnect();

    DeviceReport {
        device: job.device.clone(),
        changes,
    }
}

/// Run every job, one worker per device, at most `settings.jobs` at once.
pub fn run(ctx: &Context, jobs: &[Job], factory: Arc<dyn SessionFactory>, progress: &dyn FleetProgress) -> FleetReport {
    let reports: Arc<Mutex<Vec<DeviceReport>>> = Arc::new(Mutex::new(Vec::with_capacity(jobs.len())));

    let work = || {
        jobs.par_iter().for_each(|job| {
            progress.on_device_start(&job.device);
            let report = run_job(ctx, job, &factory);
            progress.on_device_complete(&report);
            reports.lock().unwrap_or_else(PoisonError::into_inner).push(report);
        });
    };

    match rayon::ThreadPoolBuilder::new().num_threads(ctx.settings.jobs).build() {
        Ok(pool) => pool.install(work),
        Err(err) => {
            log::warn!("Cannot build a worker pool ({err}); using the global pool");
            work();
        }
    }

    let mut devices = std::mem::take(&mut *reports.lock().unwrap_or_else(PoisonError::into_inner));
    devices.sort_by(|a, b| a.device.cmp(&b.device));
    log::info!(
        "Fleet run finished: {} devices, {} failed",
        devices.len(),
        devices.iter().filter(|d| !d.is_success()).count()
    );
    FleetReport { devices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeviceProfile, Settings};
    use crate::model::{CpSpec, PersistedState, ServiceType};
    use devicekit::DeviceSession;
    use devicekit::mock::ScriptedSession;
    use statestore::{SqliteStore, StateStore};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RPC_ERROR: &str = "<rpc-reply><rpc-error><error-message>commit check failed</error-message></rpc-error></rpc-reply>";

    fn context(devices: &[&str]) -> Context {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let profiles = devices
            .iter()
            .map(|name| DeviceProfile::new(*name, "192.0.2.1", "admin"))
            .collect();
        let settings = Settings {
            jobs: 2,
            ..Settings::default()
        };
        Context::new(settings, profiles, store)
    }

    fn factory(scripts: Vec<(&str, ScriptedSession)>) -> (Arc<dyn SessionFactory>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let scripts: Mutex<HashMap<String, ScriptedSession>> =
            Mutex::new(scripts.into_iter().map(|(d, s)| (d.to_string(), s)).collect());
        let factory = move |profile: &DeviceProfile, _: &Settings| -> Box<dyn DeviceSession> {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(scripts.lock().unwrap().remove(&profile.name).unwrap_or_default())
        };
        (Arc::new(factory), opened)
    }

    fn cp(device: &str, vlan_id: u16) -> (DesiredChange, Operation) {
        let mut change = DesiredChange::new(device, ServiceType::L2Slice).with_slice("blue");
        change.cps.push(CpSpec::new("swp1", vlan_id));
        (change, Operation::Merge)
    }

    #[test]
    fn test_group_by_device() {
        let jobs = Job::group(vec![cp("leaf1", 100), cp("leaf2", 100), cp("leaf1", 200)]);

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].device, "leaf1");
        assert_eq!(jobs[0].changes.len(), 2);
        assert_eq!(jobs[0].changes[1].0.cps[0].vlan_id, 200);
        assert_eq!(jobs[1].device, "leaf2");
    }

    #[test]
    fn test_devices_run_independently() {
        let ctx = context(&["leaf1", "leaf2"]);
        let (factory, _) = factory(vec![("leaf1", ScriptedSession::new().respond("validate", RPC_ERROR))]);
        let jobs = Job::group(vec![cp("leaf1", 100), cp("leaf1", 200), cp("leaf2", 100), cp("leaf2", 200)]);

        let report = run(&ctx, &jobs, factory, &NoProgress);

        assert_eq!(report.failed(), 1);
        let leaf1 = &report.devices[0];
        assert_eq!(leaf1.device, "leaf1");
        assert_eq!(leaf1.changes[0].status.outcome(), Some(Outcome::ValidationFailed));
        assert!(matches!(leaf1.changes[1].status, ChangeStatus::Skipped));
        assert!(report.devices[1].is_success());

        let leaf2 = PersistedState::load(ctx.store.as_ref(), "leaf2").unwrap();
        assert!(leaf2.vlan_if("swp1", 200).is_some());
        assert!(PersistedState::load(ctx.store.as_ref(), "leaf1").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_device() {
        let ctx = context(&["leaf1"]);
        let (factory, opened) = factory(Vec::new());

        let report = run(&ctx, &Job::group(vec![cp("leaf9", 100)]), factory, &NoProgress);

        assert!(matches!(
            report.devices[0].changes[0].status,
            ChangeStatus::Failed(Error::UnknownDevice(_))
        ));
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_run_skips_everything() {
        let ctx = context(&["leaf1", "leaf2"]);
        ctx.cancel.cancel();
        let (factory, opened) = factory(Vec::new());

        let report = run(&ctx, &Job::group(vec![cp("leaf1", 100), cp("leaf2", 100)]), factory, &NoProgress);

        assert_eq!(report.failed(), 2);
        assert!(
            report
                .devices
                .iter()
                .all(|d| matches!(d.changes[0].status, ChangeStatus::Skipped))
        );
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_progress_sees_every_device() {
        struct Counting(AtomicUsize);

        impl FleetProgress for Counting {
            fn on_device_start(&self, _device: &str) {}

            fn on_device_complete(&self, _report: &DeviceReport) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let ctx = context(&["leaf1", "leaf2", "leaf3"]);
        let (factory, _) = factory(Vec::new());
        let progress = Counting(AtomicUsize::new(0));

        let jobs = Job::group(vec![cp("leaf1", 100), cp("leaf2", 100), cp("leaf3", 100)]);
        let report = run(&ctx, &jobs, factory, &progress);

        assert!(report.is_success());
        assert_eq!(progress.0.load(Ordering::SeqCst), 3);
    }
}
