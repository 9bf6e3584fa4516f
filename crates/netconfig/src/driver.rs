//! Per-device service driver.
//!
//! [`ServiceDriver`] is the public face of the engine for one device. It
//! maps `connect`, `update`, `delete`, `reserve`, `enable`, `disconnect`,
//! `get` and `compare` onto the compiler, the transaction coordinator and
//! the comparator, and keeps the persisted state in step with what was
//! committed.
//!
//! After a successful commit the driver projects the change onto the
//! persisted state and stores the difference with one `write_all`, so the
//! store never holds a half-applied update. A store failure at that point is
//! reported as [`Error::CommittedNotPersisted`]: the device already carries
//! the change.

use crate::comparator::{self, Comparison, Scope};
use crate::compiler::{self, Compiled};
use crate::context::{Context, DeviceProfile, Settings};
use crate::coordinator::{TransactionCoordinator, TransactionSession, TxState};
use crate::error::{CompileError, Error, Result};
use crate::model::{DesiredChange, Operation, PersistedState, ServiceType};
use crate::recovery::{self, RecoveryKind, RecoveryReport, RecoveryRequest};
use crate::tree::ConfigTree;
use devicekit::{DeviceSession, ProcessSession};
use statestore::StateStore;
use std::sync::Arc;

/// Opens device sessions for drivers.
pub trait SessionFactory: Send + Sync {
    /// A new, not yet connected session to `profile`.
    fn open(&self, profile: &DeviceProfile, settings: &Settings) -> Box<dyn DeviceSession>;
}

impl<F> SessionFactory for F
where
    F: Fn(&DeviceProfile, &Settings) -> Box<dyn DeviceSession> + Send + Sync,
{
    fn open(&self, profile: &DeviceProfile, settings: &Settings) -> Box<dyn DeviceSession> {
        self(profile, settings)
    }
}

/// Sessions backed by the device profile's command.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSessionFactory;

impl SessionFactory for ProcessSessionFactory {
    fn open(&self, profile: &DeviceProfile, settings: &Settings) -> Box<dyn DeviceSession> {
        Box::new(ProcessSession::new(profile.session_options(settings.step_timeout())))
    }
}

/// A confirmed commit waiting for `enable`.
#[derive(Debug, Clone)]
struct Reservation {
    before: PersistedState,
    after: PersistedState,
}

/// Driver for one device.
pub struct ServiceDriver {
    profile: DeviceProfile,
    settings: Settings,
    store: Arc<dyn StateStore>,
    coordinator: TransactionCoordinator,
    factory: Arc<dyn SessionFactory>,
    tx: Option<TransactionSession>,
    pending: Option<Reservation>,
}

impl ServiceDriver {
    /// Driver for `profile`, sharing the store and cancellation of `ctx`.
    pub fn new(ctx: &Context, profile: DeviceProfile, factory: Arc<dyn SessionFactory>) -> Self {
        let coordinator =
            TransactionCoordinator::new(ctx.cancel.clone()).with_confirm_timeout(ctx.settings.confirm_timeout());
        Self {
            profile,
            settings: ctx.settings.clone(),
            store: Arc::clone(&ctx.store),
            coordinator,
            factory,
            tx: None,
            pending: None,
        }
    }

    /// Driver for a configured device.
    pub fn for_device(ctx: &Context, device: &str, factory: Arc<dyn SessionFactory>) -> Result<Self> {
        let profile = ctx
            .device(device)
            .cloned()
            .ok_or_else(|| Error::UnknownDevice(device.to_string()))?;
        Ok(Self::new(ctx, profile, factory))
    }

    /// Device name.
    pub fn device(&self) -> &str {
        &self.profile.name
    }

    /// Whether a reservation awaits `enable`.
    pub fn has_pending_reservation(&self) -> bool {
        self.pending.is_some()
    }

    fn ensure_supported(&self, service: ServiceType) -> Result<()> {
        if self.profile.supports(service) {
            return Ok(());
        }
        let err = Error::ServiceTypeUnsupported {
            device: self.profile.name.clone(),
            service,
        };
        log::error!("{err}");
        Err(err)
    }

    fn ensure_device(&self, change: &DesiredChange) -> Result<()> {
        if change.device == self.profile.name {
            return Ok(());
        }
        let err = CompileError::InsufficientData(format!(
            "change targets {} but this driver serves {}",
            change.device, self.profile.name
        ));
        log::error!("{}: {err}", self.profile.name);
        Err(err.into())
    }

    fn load(&self) -> Result<PersistedState> {
        PersistedState::load(self.store.as_ref(), &self.profile.name)
    }

    /// Compile against `base`, or the stored state when `base` is `None`.
    fn prepare(
        &self,
        change: &DesiredChange,
        op: Operation,
        base: Option<&PersistedState>,
    ) -> Result<(PersistedState, Compiled)> {
        self.ensure_supported(change.service)?;
        self.ensure_device(change)?;
        let state = match base {
            Some(state) => state.clone(),
            None => self.load()?,
        };
        let compiled = compiler::compile(change, &state, op).map_err(|err| {
            log::error!("{}: {op} {} does not compile: {err}", self.profile.name, change.service);
            Error::Compilation(err)
        })?;
        Ok((state, compiled))
    }

    /// Open and connect a session unless one is already up.
    fn open(&mut self) -> Result<&mut TransactionSession> {
        if self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.state() == TxState::Disconnected)
        {
            self.tx = None;
        }
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => {
                let session = self.factory.open(&self.profile, &self.settings);
                let mut tx = TransactionSession::new(self.profile.name.clone(), session, self.profile.vendor.adapter());
                if tx.state() == TxState::Disconnected {
                    tx.connect(&self.profile.credentials())?;
                }
                tx
            }
        };
        Ok(self.tx.insert(tx))
    }

    fn persist(&self, before: &PersistedState, after: &PersistedState) -> Result<()> {
        let writes = PersistedState::write_requests_from(before, after)?;
        if writes.is_empty() {
            return Ok(());
        }
        self.store.write_all(&writes).inspect_err(|err| {
            log::error!("{}: persisting committed state failed: {err}", self.profile.name);
        })?;
        log::debug!("{}: persisted {} record changes", self.profile.name, writes.len());
        Ok(())
    }

    /// Persist a change the device has already committed.
    fn persist_committed(&self, before: &PersistedState, after: &PersistedState) -> Result<()> {
        self.persist(before, after).map_err(|err| self.not_persisted(err))
    }

    fn not_persisted(&self, err: Error) -> Error {
        let err = Error::CommittedNotPersisted {
            device: self.profile.name.clone(),
            source: Box::new(err),
        };
        log::error!("{err}; stored state lags the device");
        err
    }

    fn verify(&mut self, state: &PersistedState, scope: &Scope) {
        let live = match self.open().and_then(|tx| tx.get_config()) {
            Ok((_, live)) => live,
            Err(err) => {
                log::warn!("{}: post-commit check skipped: {err}", self.profile.name);
                return;
            }
        };
        let comparison = comparator::compare(&live, state, scope);
        if let Some(mismatch) = &comparison.mismatch {
            let err = Error::ComparisonMismatch {
                device: self.profile.name.clone(),
                path: mismatch.path.to_string(),
            };
            log::warn!("{err} ({mismatch})");
        }
    }

    /// Connect to the device. A no-op when already connected.
    pub fn connect(&mut self) -> Result<()> {
        self.open().map(|_| ())
    }

    /// Directives a change would send, without touching the device.
    pub fn compile(&self, change: &DesiredChange, op: Operation) -> Result<Compiled> {
        self.prepare(change, op, None).map(|(_, compiled)| compiled)
    }

    /// Apply a change in one transaction and persist the result.
    pub fn update(&mut self, change: &DesiredChange, op: Operation) -> Result<()> {
        let (before, compiled) = self.prepare(change, op, None)?;
        let after = before.apply_change(change, op);

        if compiled.batch.is_empty() {
            log::info!("{}: {op} {} needs no directives", self.profile.name, change.service);
            return self.persist(&before, &after);
        }

        let coordinator = self.coordinator.clone();
        coordinator.apply(self.open()?, std::slice::from_ref(&compiled.batch))?;
        log::info!(
            "{}: committed {op} {} ({} directives)",
            self.profile.name,
            change.service,
            compiled.batch.len()
        );
        self.persist_committed(&before, &after)?;

        if self.settings.verify_after_commit {
            let scope = if change.service.is_slice() {
                Scope::Slice(change.slice().to_string())
            } else {
                Scope::Device
            };
            self.verify(&after, &scope);
        }
        Ok(())
    }

    /// Remove what a change describes.
    pub fn delete(&mut self, change: &DesiredChange) -> Result<()> {
        self.update(change, Operation::Delete)
    }

    /// Apply a change with a confirmed commit. The device rolls it back
    /// unless [`ServiceDriver::enable`] confirms in time; the store is only
    /// written on `enable`.
    ///
    /// Successive reservations stack: each compiles against the state the
    /// previous one projects.
    pub fn reserve(&mut self, change: &DesiredChange, op: Operation) -> Result<()> {
        let base = self.pending.as_ref().map(|r| r.after.clone());
        let (state, compiled) = self.prepare(change, op, base.as_ref())?;
        let after = state.apply_change(change, op);

        if !compiled.batch.is_empty() {
            let coordinator = self.coordinator.clone();
            coordinator.reserve(self.open()?, std::slice::from_ref(&compiled.batch))?;
            log::info!("{}: reserved {op} {}", self.profile.name, change.service);
        }
        let before = match self.pending.take() {
            Some(reservation) => reservation.before,
            None => state,
        };
        self.pending = Some(Reservation { before, after });
        Ok(())
    }

    /// Re-arm reservations made by an earlier driver, typically in another
    /// process, so that [`ServiceDriver::enable`] persists them.
    ///
    /// Nothing is sent to the device.
    pub fn resume_reservation(&mut self, changes: &[(DesiredChange, Operation)]) -> Result<()> {
        for (change, _) in changes {
            self.ensure_supported(change.service)?;
            self.ensure_device(change)?;
        }
        let before = self.load()?;
        let after = changes
            .iter()
            .fold(before.clone(), |state, (change, op)| state.apply_change(change, *op));
        log::debug!("{}: resumed {} reserved changes", self.profile.name, changes.len());
        self.pending = Some(Reservation { before, after });
        Ok(())
    }

    /// Confirm the pending reservation and persist it.
    pub fn enable(&mut self) -> Result<()> {
        let coordinator = self.coordinator.clone();
        coordinator.enable(self.open()?)?;
        match self.pending.take() {
            Some(reservation) => self.persist_committed(&reservation.before, &reservation.after)?,
            None => log::info!("{}: confirmed without a pending reservation", self.profile.name),
        }
        Ok(())
    }

    /// Push recovered changes to a replacement device and store the
    /// recovered state.
    ///
    /// The device is assumed blank for what is being rebuilt: node changes
    /// compile against an empty state, slice changes against the stored node
    /// part. Each change that commits has its state update written at once,
    /// so one failed slice does not hold back the others. A change that
    /// commits but cannot be stored is reported as failed and later changes
    /// still compile against the last stored state.
    pub fn recover(&mut self, request: &RecoveryRequest) -> Result<RecoveryReport> {
        if request.device != self.profile.name {
            return Err(Error::UnknownDevice(request.device.clone()));
        }
        let snapshot = self.load()?;
        let planned = recovery::recover(request, &snapshot);
        let mut base = match request.kind {
            RecoveryKind::Node => PersistedState::empty(self.profile.name.clone()),
            RecoveryKind::Slices => snapshot.node_part(),
        };

        let mut report = RecoveryReport {
            recovered: Vec::with_capacity(planned.recovered.len()),
            failed: planned.failed,
        };
        for item in planned.recovered {
            let label = item.change.slice_name.clone().unwrap_or_else(|| self.profile.name.clone());
            let next = match self.replay(&item.change, &base) {
                Ok(next) => next,
                Err(err) => {
                    log::error!("{}: replaying {label} failed: {err}", self.profile.name);
                    report.failed.push((label, err));
                    continue;
                }
            };
            match self.store.write_all(&item.writes) {
                Ok(()) => {
                    base = next;
                    report.recovered.push(item);
                }
                Err(err) => {
                    let err = self.not_persisted(err.into());
                    report.failed.push((label, err));
                }
            }
        }
        Ok(report)
    }

    fn replay(&mut self, change: &DesiredChange, base: &PersistedState) -> Result<PersistedState> {
        let (state, compiled) = self.prepare(change, Operation::Merge, Some(base))?;
        if !compiled.batch.is_empty() {
            let coordinator = self.coordinator.clone();
            coordinator.apply(self.open()?, std::slice::from_ref(&compiled.batch))?;
        }
        Ok(state.apply_change(change, Operation::Merge))
    }

    /// Close the session. Best effort: never fails.
    pub fn disconnect(&mut self) {
        if self.pending.is_some() {
            log::warn!(
                "{}: disconnecting with an unconfirmed reservation; the device will roll it back",
                self.profile.name
            );
        }
        if let Some(mut tx) = self.tx.take() {
            tx.disconnect();
        }
    }

    /// Raw running configuration.
    pub fn get(&mut self) -> Result<String> {
        self.open()?.get_config().map(|(text, _)| text)
    }

    /// Parsed running configuration and persisted state, for reports.
    pub fn snapshot(&mut self) -> Result<(ConfigTree, PersistedState)> {
        let state = self.load()?;
        let (_, live) = self.open()?.get_config()?;
        Ok((live, state))
    }

    /// Check the running configuration against the persisted state.
    ///
    /// A mismatch is an audit signal, not an error: it is logged and
    /// returned in the [`Comparison`].
    pub fn compare(&mut self, scope: &Scope) -> Result<Comparison> {
        let state = self.load()?;
        if let Scope::Slice(slice_name) = scope {
            let service = if state.vrf(slice_name).is_some() {
                ServiceType::L3Slice
            } else {
                ServiceType::L2Slice
            };
            self.ensure_supported(service)?;
        }
        let (_, live) = self.open()?.get_config()?;
        let comparison = comparator::compare(&live, &state, scope);
        match &comparison.mismatch {
            Some(mismatch) => {
                let err = Error::ComparisonMismatch {
                    device: self.profile.name.clone(),
                    path: mismatch.path.to_string(),
                };
                log::warn!("{err} ({mismatch})");
            }
            None => log::info!("{}: live configuration matches", self.profile.name),
        }
        Ok(comparison)
    }
}

impl std::fmt::Debug for ServiceDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDriver")
            .field("device", &self.profile.name)
            .field("state", &self.tx.as_ref().map(TransactionSession::state))
            .field("pending", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outcome;
    use crate::model::CpSpec;
    use crate::vendor::Vendor;
    use devicekit::ErrorCategory;
    use devicekit::mock::{ScriptedSession, Transcript};
    use statestore::SqliteStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const RPC_ERROR: &str = "<rpc-reply><rpc-error><error-severity>error</error-severity>\
                             <error-message>commit check failed</error-message></rpc-error></rpc-reply>";

    /// Store whose writes can be switched to fail.
    struct FlakyStore {
        inner: SqliteStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                failing: AtomicBool::new(false),
            }
        }

        fn fail_writes(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl StateStore for FlakyStore {
        fn read(&self, device: &str, category: &str) -> statestore::Result<Vec<statestore::StoredRecord>> {
            self.inner.read(device, category)
        }

        fn write_all(&self, batch: &[statestore::WriteRequest]) -> statestore::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(statestore::Error::Io(std::io::Error::other("disk full")));
            }
            self.inner.write_all(batch)
        }

        fn devices(&self) -> statestore::Result<Vec<String>> {
            self.inner.devices()
        }
    }

    struct Harness {
        driver: ServiceDriver,
        transcript: Transcript,
        opened: Arc<AtomicUsize>,
        store: Arc<dyn StateStore>,
    }

    fn harness_with(profile: DeviceProfile, settings: Settings, script: ScriptedSession) -> Harness {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        harness_on(profile, settings, script, store)
    }

    fn harness_on(
        profile: DeviceProfile,
        settings: Settings,
        script: ScriptedSession,
        store: Arc<dyn StateStore>,
    ) -> Harness {
        let transcript = script.transcript();
        let opened = Arc::new(AtomicUsize::new(0));
        let queue = Mutex::new(VecDeque::from([script]));
        let counter = Arc::clone(&opened);
        let factory = move |_: &DeviceProfile, _: &Settings| -> Box<dyn DeviceSession> {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(queue.lock().unwrap().pop_front().unwrap_or_default())
        };
        let ctx = Context::new(settings, vec![profile.clone()], Arc::clone(&store));
        Harness {
            driver: ServiceDriver::new(&ctx, profile, Arc::new(factory)),
            transcript,
            opened,
            store,
        }
    }

    fn harness(script: ScriptedSession) -> Harness {
        harness_with(DeviceProfile::new("leaf1", "10.0.0.11", "admin"), Settings::default(), script)
    }

    fn flaky_harness(store: &Arc<FlakyStore>) -> Harness {
        let shared: Arc<dyn StateStore> = Arc::clone(store) as Arc<dyn StateStore>;
        harness_on(
            DeviceProfile::new("leaf1", "10.0.0.11", "admin"),
            Settings::default(),
            ScriptedSession::new(),
            shared,
        )
    }

    fn blue(vlan_id: u16) -> DesiredChange {
        let mut change = DesiredChange::new("leaf1", ServiceType::L2Slice).with_slice("blue");
        change.cps.push(CpSpec::new("swp1", vlan_id));
        change
    }

    fn stored(h: &Harness) -> PersistedState {
        PersistedState::load(h.store.as_ref(), "leaf1").unwrap()
    }

    #[test]
    fn test_unsupported_service_fails_closed() {
        let mut profile = DeviceProfile::new("leaf1", "10.0.0.11", "admin");
        profile.services = vec![ServiceType::Leaf];
        let mut h = harness_with(profile, Settings::default(), ScriptedSession::new());

        let err = h.driver.update(&blue(100), Operation::Merge).unwrap_err();

        assert!(matches!(err, Error::ServiceTypeUnsupported { service: ServiceType::L2Slice, .. }));
        assert_eq!(Outcome::of(&Err::<(), _>(err)), Outcome::Error);
        assert_eq!(h.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_commits_and_persists() {
        let mut h = harness(ScriptedSession::new());

        h.driver.update(&blue(100), Operation::Merge).unwrap();

        let ops = h.transcript.ops();
        assert_eq!(ops[0], "connect");
        assert_eq!(ops.iter().filter(|op| *op == "commit").count(), 1);
        assert_eq!(ops.last().map(String::as_str), Some("unlock"));
        assert!(stored(&h).vlan_if("swp1", 100).is_some());
    }

    #[test]
    fn test_session_is_reused() {
        let mut h = harness(ScriptedSession::new());

        h.driver.update(&blue(100), Operation::Merge).unwrap();
        h.driver.update(&blue(200), Operation::Merge).unwrap();

        assert_eq!(h.opened.load(Ordering::SeqCst), 1);
        assert_eq!(h.transcript.count("connect"), 1);
        assert_eq!(h.transcript.count("commit"), 2);
        assert!(stored(&h).vlan_if("swp1", 200).is_some());
    }

    #[test]
    fn test_validation_failure_leaves_store_untouched() {
        let mut h = harness(ScriptedSession::new().respond("validate", RPC_ERROR));

        let result = h.driver.update(&blue(100), Operation::Merge);

        assert_eq!(Outcome::of(&result), Outcome::ValidationFailed);
        assert_eq!(h.transcript.count("commit"), 0);
        assert!(stored(&h).is_empty());
    }

    #[test]
    fn test_delete_removes_persisted_records() {
        let mut h = harness(ScriptedSession::new());
        h.driver.update(&blue(100), Operation::Merge).unwrap();
        h.driver.update(&blue(200), Operation::Merge).unwrap();

        h.driver.delete(&blue(100)).unwrap();

        let state = stored(&h);
        assert!(state.vlan_if("swp1", 100).is_none());
        assert!(state.vlan_if("swp1", 200).is_some());
        assert_eq!(h.transcript.count("commit"), 3);
    }

    #[test]
    fn test_compile_failure_never_opens_a_session() {
        let mut h = harness(ScriptedSession::new());
        let mut change = DesiredChange::new("leaf1", ServiceType::L2Slice);
        change.cps.push(CpSpec::new("swp1", 100));

        let err = h.driver.update(&change, Operation::Merge).unwrap_err();

        assert!(matches!(err, Error::Compilation(CompileError::InsufficientData(_))));
        assert_eq!(h.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_change_for_another_device_is_rejected() {
        let mut h = harness(ScriptedSession::new());
        let mut change = blue(100);
        change.device = "leaf2".into();

        assert!(matches!(
            h.driver.update(&change, Operation::Merge),
            Err(Error::Compilation(_))
        ));
    }

    #[test]
    fn test_connect_timeout() {
        let mut h = harness(ScriptedSession::new().fail_connect(ErrorCategory::Timeout));

        let err = h.driver.connect().unwrap_err();

        match err {
            Error::Connection(conn) => assert_eq!(conn.kind, crate::error::ConnectionErrorKind::Timeout),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reserve_then_enable() {
        let mut h = harness(ScriptedSession::new());

        h.driver.reserve(&blue(100), Operation::Merge).unwrap();
        assert!(h.driver.has_pending_reservation());
        assert!(stored(&h).is_empty());
        assert_eq!(h.transcript.count("confirmed-commit"), 1);
        assert_eq!(h.transcript.count("commit"), 0);

        h.driver.enable().unwrap();
        assert!(!h.driver.has_pending_reservation());
        assert!(stored(&h).vlan_if("swp1", 100).is_some());
    }

    #[test]
    fn test_stacked_reservations_persist_together() {
        let mut h = harness(ScriptedSession::new());

        h.driver.reserve(&blue(100), Operation::Merge).unwrap();
        h.driver.reserve(&blue(200), Operation::Merge).unwrap();
        h.driver.enable().unwrap();

        let state = stored(&h);
        assert!(state.vlan_if("swp1", 100).is_some());
        assert!(state.vlan_if("swp1", 200).is_some());
    }

    #[test]
    fn test_resumed_reservation_is_persisted_on_enable() {
        let mut h = harness(ScriptedSession::new());

        h.driver.resume_reservation(&[(blue(100), Operation::Merge)]).unwrap();
        assert!(stored(&h).is_empty());

        h.driver.enable().unwrap();
        assert_eq!(h.transcript.count("confirmed-commit"), 0);
        assert!(stored(&h).vlan_if("swp1", 100).is_some());
    }

    #[test]
    fn test_recover_slices_onto_renamed_ports() {
        let mut h = harness(ScriptedSession::new());
        h.driver.update(&blue(100), Operation::Merge).unwrap();
        let mut request = RecoveryRequest::new("leaf1", RecoveryKind::Slices);
        request.rename.insert("swp1".into(), "swp9".into());

        let report = h.driver.recover(&request).unwrap();

        assert_eq!(report.recovered.len(), 1);
        assert!(report.failed.is_empty());
        assert_eq!(h.transcript.count("commit"), 2);
        let state = stored(&h);
        assert!(state.vlan_if("swp9", 100).is_some());
        assert!(state.vlan_if("swp1", 100).is_none());
    }

    #[test]
    fn test_recover_failure_keeps_store() {
        let mut h = harness(ScriptedSession::new());
        h.driver.update(&blue(100), Operation::Merge).unwrap();
        let mut request = RecoveryRequest::new("leaf1", RecoveryKind::Slices);
        request.rename.insert("swp2".into(), "swp9".into());

        let report = h.driver.recover(&request).unwrap();

        assert!(report.recovered.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(stored(&h).vlan_if("swp1", 100).is_some());
    }

    #[test]
    fn test_store_failure_after_commit_is_reported() {
        let store = Arc::new(FlakyStore::new());
        let mut h = flaky_harness(&store);
        store.fail_writes(true);

        let err = h.driver.update(&blue(100), Operation::Merge).unwrap_err();

        assert_eq!(h.transcript.count("commit"), 1);
        match &err {
            Error::CommittedNotPersisted { device, source } => {
                assert_eq!(device, "leaf1");
                assert!(matches!(**source, Error::Store(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.outcome(), Outcome::Error);
        assert!(stored(&h).is_empty());
    }

    #[test]
    fn test_enable_store_failure_is_reported() {
        let store = Arc::new(FlakyStore::new());
        let mut h = flaky_harness(&store);
        h.driver.reserve(&blue(100), Operation::Merge).unwrap();
        store.fail_writes(true);

        let err = h.driver.enable().unwrap_err();

        assert!(matches!(err, Error::CommittedNotPersisted { .. }));
        assert!(!h.driver.has_pending_reservation());
    }

    #[test]
    fn test_recover_store_failure_is_recorded_per_slice() {
        let store = Arc::new(FlakyStore::new());
        let mut h = flaky_harness(&store);
        h.driver.update(&blue(100), Operation::Merge).unwrap();
        let mut red = DesiredChange::new("leaf1", ServiceType::L2Slice).with_slice("red");
        red.cps.push(CpSpec::new("swp2", 300));
        h.driver.update(&red, Operation::Merge).unwrap();
        store.fail_writes(true);

        let report = h.driver.recover(&RecoveryRequest::new("leaf1", RecoveryKind::Slices)).unwrap();

        assert!(report.recovered.is_empty());
        let mut labels: Vec<_> = report.failed.iter().map(|(label, _)| label.as_str()).collect();
        labels.sort_unstable();
        assert_eq!(labels, vec!["blue", "red"]);
        assert!(
            report
                .failed
                .iter()
                .all(|(_, err)| matches!(err, Error::CommittedNotPersisted { .. }))
        );
        assert_eq!(h.transcript.count("commit"), 4);
    }

    #[test]
    fn test_compare_empty_slice_matches() {
        let mut profile = DeviceProfile::new("leaf1", "10.0.0.11", "admin");
        profile.vendor = Vendor::Cli;
        let script = ScriptedSession::new().respond("get-config", "leaf1# ");
        let mut h = harness_with(profile, Settings::default(), script);

        let comparison = h.driver.compare(&Scope::Slice("blue".into())).unwrap();

        assert!(comparison.matched);
    }

    #[test]
    fn test_compare_reports_missing_slice() {
        let mut profile = DeviceProfile::new("leaf1", "10.0.0.11", "admin");
        profile.vendor = Vendor::Cli;
        let script = ScriptedSession::new()
            .default_reply("leaf1# ")
            .respond("get-config", "leaf1# ");
        let mut h = harness_with(profile, Settings::default(), script);
        h.driver.update(&blue(100), Operation::Merge).unwrap();

        let comparison = h.driver.compare(&Scope::Slice("blue".into())).unwrap();

        assert!(!comparison.matched);
        assert!(comparison.mismatch.is_some());
    }

    #[test]
    fn test_verification_mismatch_is_not_fatal() {
        let settings = Settings {
            verify_after_commit: true,
            ..Settings::default()
        };
        let mut h = harness_with(
            DeviceProfile::new("leaf1", "10.0.0.11", "admin"),
            settings,
            ScriptedSession::new(),
        );

        h.driver.update(&blue(100), Operation::Merge).unwrap();

        assert_eq!(h.transcript.count("get-config"), 1);
        assert!(stored(&h).vlan_if("swp1", 100).is_some());
    }

    #[test]
    fn test_get_returns_raw_text() {
        let mut h = harness(ScriptedSession::new().respond("get-config", "<rpc-reply><data/></rpc-reply>"));
        assert_eq!(h.driver.get().unwrap(), "<rpc-reply><data/></rpc-reply>");
    }

    #[test]
    fn test_disconnect_is_best_effort() {
        let mut h = harness(ScriptedSession::new().fail("close-session", ErrorCategory::Transport));
        h.driver.connect().unwrap();

        h.driver.disconnect();

        assert_eq!(h.transcript.ops().last().map(String::as_str), Some("disconnect"));
        h.driver.disconnect();
    }
}
