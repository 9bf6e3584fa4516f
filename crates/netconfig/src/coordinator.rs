//! Transaction protocol state machine.
//!
//! A [`TransactionSession`] owns one device session for the duration of a
//! driver call and moves through [`TxState`] one protocol step at a time.
//! Every step sends exactly one request; the step fails when the transport
//! fails, times out, or the reply carries the dialect's error marker.
//!
//! [`TransactionCoordinator`] sequences the steps of a change:
//!
//! ```text
//! discard-changes -> lock -> edit-config (one per batch) -> validate -> commit -> unlock
//! ```
//!
//! Any failure after the lock is taken runs discard-changes and unlock
//! before the error is returned, so a failed transaction never leaves a
//! half-edited candidate behind. Unlock failures are logged and ignored.

use crate::context::CancelToken;
use crate::directive::DirectiveBatch;
use crate::error::{ConnectionError, Error, Result};
use crate::tree::ConfigTree;
use crate::vendor::{SendFailure, Step, VendorAdapter};
use devicekit::{Credentials, DeviceSession};
use std::sync::Arc;
use std::time::Duration;

/// Protocol state of a transaction session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No transport
    Disconnected,
    /// Transport open, no lock
    Connected,
    /// Candidate discarded and locked
    Locked,
    /// At least one edit sent
    Editing,
    /// Candidate accepted by the device
    Validated,
    /// Candidate active
    Committed,
    /// Lock released after a commit
    Unlocked,
    /// Transaction abandoned; candidate discarded
    Aborted,
}

impl TxState {
    /// Whether a step may move a session from `self` to `next`.
    pub fn can_move_to(self, next: TxState) -> bool {
        use TxState::*;

        matches!(
            (self, next),
            (Disconnected, Connected)
                | (Connected | Unlocked | Aborted, Locked)
                | (Locked | Editing, Editing)
                | (Editing, Validated)
                | (Validated | Locked | Committed, Committed)
                | (Committed, Unlocked)
                | (Connected | Unlocked | Aborted, Disconnected)
                | (_, Aborted)
        )
    }

    /// Whether the device lock is held in this state.
    pub fn holds_lock(self) -> bool {
        matches!(
            self,
            TxState::Locked | TxState::Editing | TxState::Validated | TxState::Committed
        )
    }
}

/// One device session driven through the protocol.
pub struct TransactionSession {
    device: String,
    session: Box<dyn DeviceSession>,
    adapter: Arc<dyn VendorAdapter>,
    state: TxState,
    applied: usize,
}

impl TransactionSession {
    /// Wrap a session. An already-open session starts as `Connected`.
    pub fn new(device: impl Into<String>, session: Box<dyn DeviceSession>, adapter: Arc<dyn VendorAdapter>) -> Self {
        let state = if session.is_connected() {
            TxState::Connected
        } else {
            TxState::Disconnected
        };
        Self {
            device: device.into(),
            session,
            adapter,
            state,
            applied: 0,
        }
    }

    /// Device name.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Current protocol state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Directives sent since the last `begin_change`.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Dialect of this session.
    pub fn adapter(&self) -> &Arc<dyn VendorAdapter> {
        &self.adapter
    }

    fn check(&self, next: TxState) -> Result<()> {
        if self.state.can_move_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    fn exchange(&mut self, step: Step, payload: &str) -> std::result::Result<String, SendFailure> {
        log::debug!("{}: {} ({} via {})", self.device, step, self.state_name(), self.adapter.name());
        self.adapter.send(self.session.as_mut(), step, payload)
    }

    fn state_name(&self) -> String {
        format!("{:?}", self.state).to_lowercase()
    }

    fn step(&mut self, step: Step, confirm_timeout: Option<Duration>) -> std::result::Result<String, SendFailure> {
        let request = self.adapter.request(step, confirm_timeout);
        self.exchange(step, &request)
    }

    fn step_failed(&self, step: Step, failure: &SendFailure) -> Error {
        log::error!("{}: {} failed: {}\n{}", self.device, step, failure, failure.response());
        Error::StepFailed {
            device: self.device.clone(),
            step,
            response: failure.response(),
        }
    }

    fn best_effort(&mut self, step: Step) {
        if let Err(failure) = self.step(step, None) {
            let err = Error::BestEffortStepFailed {
                device: self.device.clone(),
                step,
                message: failure.to_string(),
            };
            log::warn!("{err}");
        }
    }

    /// Open the transport.
    pub fn connect(&mut self, credentials: &Credentials) -> Result<()> {
        self.check(TxState::Connected)?;
        if let Err(err) = self.session.connect(credentials) {
            let err = ConnectionError::from_session(&self.device, &err);
            log::error!("{err}");
            return Err(err.into());
        }
        log::info!("{}: connected to {}:{}", self.device, credentials.host, credentials.port);
        self.state = TxState::Connected;
        Ok(())
    }

    /// Discard stale candidate changes and take the lock, in the order the
    /// adapter asks for.
    ///
    /// Both steps must succeed; on failure the state is unchanged and a lock
    /// already taken is released.
    pub fn begin_change(&mut self) -> Result<()> {
        self.check(TxState::Locked)?;
        let mut locked = false;
        for step in self.adapter.opening_steps() {
            if let Err(failure) = self.step(step, None) {
                let err = self.step_failed(step, &failure);
                if locked {
                    self.best_effort(Step::Unlock);
                }
                return Err(err);
            }
            locked |= step == Step::Lock;
        }
        self.state = TxState::Locked;
        self.applied = 0;
        Ok(())
    }

    /// Send one batch as a single edit.
    ///
    /// A rejected edit fails the whole batch; nothing is retried.
    pub fn apply_directives(&mut self, batch: &DirectiveBatch) -> Result<()> {
        self.check(TxState::Editing)?;
        if batch.is_empty() {
            log::debug!("{}: empty {} batch, nothing to send", self.device, batch.service);
            self.state = TxState::Editing;
            return Ok(());
        }

        let payload = self.adapter.encode(batch);
        if let Err(failure) = self.exchange(Step::Edit, &payload) {
            log::error!(
                "{}: {} {} edit rejected: {}\n{}",
                self.device,
                batch.operation,
                batch.service,
                failure,
                failure.response()
            );
            return Err(Error::DirectiveRejected {
                device: self.device.clone(),
                service: batch.service,
                response: failure.response(),
            });
        }
        self.applied += batch.len();
        self.state = TxState::Editing;
        Ok(())
    }

    /// Ask the device to check the candidate.
    pub fn validate(&mut self) -> Result<()> {
        self.check(TxState::Validated)?;
        if let Err(failure) = self.step(Step::Validate, None) {
            log::error!("{}: validation failed: {}\n{}", self.device, failure, failure.response());
            return Err(Error::ValidationFailed {
                device: self.device.clone(),
                response: failure.response(),
            });
        }
        self.state = TxState::Validated;
        Ok(())
    }

    /// Activate the validated candidate.
    pub fn commit(&mut self) -> Result<()> {
        if self.state != TxState::Validated {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: TxState::Committed,
            });
        }
        self.commit_step(Step::Commit, None)
    }

    /// Activate the validated candidate, rolled back by the device unless
    /// confirmed within `timeout`.
    pub fn confirmed_commit(&mut self, timeout: Duration) -> Result<()> {
        if self.state != TxState::Validated {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: TxState::Committed,
            });
        }
        self.commit_step(Step::ConfirmedCommit, Some(timeout))
    }

    /// Confirm a pending confirmed commit.
    pub fn confirm(&mut self) -> Result<()> {
        if !matches!(self.state, TxState::Locked | TxState::Committed) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: TxState::Committed,
            });
        }
        self.commit_step(Step::Commit, None)
    }

    fn commit_step(&mut self, step: Step, timeout: Option<Duration>) -> Result<()> {
        if let Err(failure) = self.step(step, timeout) {
            return Err(self.step_failed(step, &failure));
        }
        log::info!("{}: {} done ({} directives)", self.device, step, self.applied);
        self.state = TxState::Committed;
        Ok(())
    }

    /// Release the lock. Failures are logged only.
    pub fn unlock(&mut self) {
        if !self.state.can_move_to(TxState::Unlocked) {
            log::warn!("{}: unlock skipped in state {}", self.device, self.state_name());
            return;
        }
        self.best_effort(Step::Unlock);
        self.state = TxState::Unlocked;
    }

    /// Drop candidate changes and release the lock, if held.
    pub fn abort(&mut self) {
        if self.state.holds_lock() {
            log::warn!("{}: aborting transaction in state {}", self.device, self.state_name());
            self.best_effort(Step::DiscardChanges);
            self.best_effort(Step::Unlock);
        }
        if self.state != TxState::Disconnected {
            self.state = TxState::Aborted;
        }
    }

    /// Read the running configuration: raw text and parsed tree.
    pub fn get_config(&mut self) -> Result<(String, ConfigTree)> {
        if self.state == TxState::Disconnected {
            return Err(Error::StepFailed {
                device: self.device.clone(),
                step: Step::GetConfig,
                response: "not connected".to_string(),
            });
        }
        let text = match self.step(Step::GetConfig, None) {
            Ok(text) => text,
            Err(failure) => return Err(self.step_failed(Step::GetConfig, &failure)),
        };
        let tree = self.adapter.parse_config(&text)?;
        Ok((text, tree))
    }

    /// Close the session. Best effort: failures are logged only.
    pub fn disconnect(&mut self) {
        if self.state.holds_lock() {
            self.abort();
        }
        if self.state == TxState::Disconnected {
            return;
        }
        self.best_effort(Step::CloseSession);
        if let Err(err) = self.session.disconnect() {
            let err = Error::BestEffortStepFailed {
                device: self.device.clone(),
                step: Step::CloseSession,
                message: err.to_string(),
            };
            log::warn!("{err}");
        }
        log::info!("{}: disconnected", self.device);
        self.state = TxState::Disconnected;
    }
}

impl Drop for TransactionSession {
    fn drop(&mut self) {
        if self.state.holds_lock() {
            log::warn!("{}: session released while holding the lock", self.device);
            self.abort();
        }
    }
}

enum CommitMode {
    Now,
    Confirmed,
}

/// Sequences the protocol steps of a change.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    cancel: CancelToken,
    confirm_timeout: Duration,
}

impl TransactionCoordinator {
    /// Coordinator observing a cancellation token.
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            confirm_timeout: Duration::from_secs(600),
        }
    }

    /// Rollback delay used by [`TransactionCoordinator::reserve`].
    #[must_use]
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    fn checkpoint(&self, tx: &TransactionSession) -> Result<()> {
        if self.cancel.is_cancelled() {
            log::warn!("{}: cancelled in state {}", tx.device(), tx.state_name());
            return Err(Error::Cancelled {
                device: tx.device().to_string(),
            });
        }
        Ok(())
    }

    /// Apply and commit every batch in one transaction.
    pub fn apply(&self, tx: &mut TransactionSession, batches: &[DirectiveBatch]) -> Result<()> {
        self.run(tx, batches, CommitMode::Now)
    }

    /// Apply every batch with a confirmed commit. The device rolls the
    /// change back unless [`TransactionCoordinator::enable`] confirms it in
    /// time.
    pub fn reserve(&self, tx: &mut TransactionSession, batches: &[DirectiveBatch]) -> Result<()> {
        self.run(tx, batches, CommitMode::Confirmed)
    }

    /// Confirm a reservation.
    pub fn enable(&self, tx: &mut TransactionSession) -> Result<()> {
        self.checkpoint(tx)?;
        tx.begin_change()?;
        match tx.confirm() {
            Ok(()) => {
                tx.unlock();
                Ok(())
            }
            Err(err) => {
                tx.abort();
                Err(err)
            }
        }
    }

    fn run(&self, tx: &mut TransactionSession, batches: &[DirectiveBatch], mode: CommitMode) -> Result<()> {
        self.checkpoint(tx)?;
        tx.begin_change()?;
        match self.edit_and_commit(tx, batches, mode) {
            Ok(()) => {
                tx.unlock();
                Ok(())
            }
            Err(err) => {
                tx.abort();
                Err(err)
            }
        }
    }

    fn edit_and_commit(&self, tx: &mut TransactionSession, batches: &[DirectiveBatch], mode: CommitMode) -> Result<()> {
        for batch in batches {
            self.checkpoint(tx)?;
            tx.apply_directives(batch)?;
        }
        self.checkpoint(tx)?;
        tx.validate()?;
        self.checkpoint(tx)?;
        match mode {
            CommitMode::Now => tx.commit(),
            CommitMode::Confirmed => tx.confirmed_commit(self.confirm_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{Directive, Stage};
    use crate::model::{Operation, ServiceType};
    use crate::tree::TreePath;
    use crate::vendor::{CliAdapter, NetconfAdapter};
    use devicekit::ErrorCategory;
    use devicekit::mock::{ScriptedSession, Transcript};

    const RPC_ERROR: &str = "<rpc-reply><rpc-error><error-severity>error</error-severity>\
                             <error-message>invalid value</error-message></rpc-error></rpc-reply>";

    fn batch(vlan: u16) -> DirectiveBatch {
        DirectiveBatch::new(
            ServiceType::L2Slice,
            Operation::Merge,
            vec![Directive::set(
                Stage::Member,
                TreePath::parse(&format!("interfaces/interface[swp1]/unit[{vlan}]/vlan-id")).unwrap(),
                vlan.to_string(),
            )],
        )
    }

    fn session(script: ScriptedSession) -> (TransactionSession, Transcript) {
        let transcript = script.transcript();
        let tx = TransactionSession::new("leaf1", Box::new(script), Arc::new(NetconfAdapter));
        (tx, transcript)
    }

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(CancelToken::new())
    }

    #[test]
    fn test_transition_table() {
        assert!(TxState::Disconnected.can_move_to(TxState::Connected));
        assert!(TxState::Editing.can_move_to(TxState::Editing));
        assert!(TxState::Validated.can_move_to(TxState::Committed));
        assert!(TxState::Committed.can_move_to(TxState::Unlocked));
        assert!(TxState::Editing.can_move_to(TxState::Aborted));
        assert!(!TxState::Connected.can_move_to(TxState::Editing));
        assert!(!TxState::Editing.can_move_to(TxState::Committed));
        assert!(!TxState::Locked.can_move_to(TxState::Validated));
        assert!(!TxState::Committed.can_move_to(TxState::Disconnected));
    }

    #[test]
    fn test_apply_step_order() {
        let (mut tx, transcript) = session(ScriptedSession::connected());
        coordinator().apply(&mut tx, &[batch(100), batch(200)]).unwrap();

        assert_eq!(
            transcript.ops(),
            vec!["discard-changes", "lock", "edit-config", "edit-config", "validate", "commit", "unlock"]
        );
        assert_eq!(tx.state(), TxState::Unlocked);
        assert_eq!(tx.applied(), 2);
    }

    #[test]
    fn test_rejected_edit_rolls_back() {
        let script = ScriptedSession::connected()
            .respond("edit-config", "<rpc-reply><ok/></rpc-reply>")
            .respond("edit-config", RPC_ERROR);
        let (mut tx, transcript) = session(script);

        let err = coordinator()
            .apply(&mut tx, &[batch(100), batch(200), batch(300)])
            .unwrap_err();

        assert!(matches!(err, Error::DirectiveRejected { service: ServiceType::L2Slice, .. }));
        assert_eq!(err.outcome(), crate::Outcome::Error);
        assert_eq!(
            transcript.ops(),
            vec!["discard-changes", "lock", "edit-config", "edit-config", "discard-changes", "unlock"]
        );
        assert_eq!(transcript.count("commit"), 0);
        assert_eq!(tx.state(), TxState::Aborted);
    }

    /// NETCONF device on a shell pipe. The first commit answers late; every
    /// other request is answered at once. `get-config` reports the requests
    /// seen so far.
    #[cfg(unix)]
    fn slow_commit_device() -> devicekit::ProcessSession {
        let script = r#"
printf '<hello><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities></hello>]]>]]>'
buf=''
seen=''
slow=1
while IFS= read -r line; do
  if [ "$line" != ']]>]]>' ]; then
    buf="$buf$line"
    continue
  fi
  id=$(printf '%s' "$buf" | sed -n 's/.*<rpc message-id="\([0-9]*\)".*/\1/p')
  body='<ok/>'
  case "$buf" in
    *'<discard-changes/>'*) op=discard ;;
    *'<unlock>'*) op=unlock ;;
    *'<lock>'*) op=lock ;;
    *'<edit-config>'*) op=edit ;;
    *'<validate>'*) op=validate ;;
    *'<commit/>'*) op=commit ;;
    *'<get-config>'*) op=get ;;
    *) op=other ;;
  esac
  seen="$seen $op"
  if [ "$op" = commit ] && [ "$slow" = 1 ]; then
    slow=0
    sleep 0.7
  fi
  if [ "$op" = get ]; then
    body="<data><configuration><system><host-name>leaf1</host-name></system><seen>$seen</seen></configuration></data>"
  fi
  printf '<rpc-reply message-id="%s">%s</rpc-reply>]]>]]>' "$id" "$body"
  buf=''
done
"#;
        devicekit::ProcessSession::new(devicekit::SessionOptions {
            command: vec!["sh".into(), "-c".into(), script.into()],
            framing: devicekit::Framing::EndOfMessage,
            timeout: std::time::Duration::from_millis(500),
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_timeout_over_a_live_session() {
        let mut tx = TransactionSession::new("leaf1", Box::new(slow_commit_device()), Arc::new(NetconfAdapter));
        tx.connect(&Credentials::new("127.0.0.1", 830, "admin")).unwrap();

        let err = coordinator().apply(&mut tx, &[batch(100)]).unwrap_err();

        assert!(matches!(err, Error::StepFailed { step: Step::Commit, .. }));
        assert_eq!(tx.state(), TxState::Aborted);

        // Each reply still pairs with its own request
        let (_, tree) = tx.get_config().unwrap();
        assert_eq!(tree.text(&TreePath::parse("system/host-name").unwrap()), Some("leaf1"));
        assert_eq!(
            tree.text(&TreePath::parse("seen").unwrap()),
            Some("discard lock edit validate commit discard unlock get")
        );
        tx.disconnect();
    }

    #[test]
    fn test_validation_failure_keeps_its_code() {
        let (mut tx, transcript) = session(ScriptedSession::connected().respond("validate", RPC_ERROR));

        let err = coordinator().apply(&mut tx, &[batch(100)]).unwrap_err();

        assert_eq!(err.outcome(), crate::Outcome::ValidationFailed);
        assert_eq!(transcript.count("commit"), 0);
        assert_eq!(transcript.count("discard-changes"), 2);
    }

    #[test]
    fn test_lock_failure_changes_nothing() {
        let (mut tx, transcript) = session(ScriptedSession::connected().respond(
            "lock",
            "<rpc-reply><rpc-error><error-message>configuration database locked</error-message></rpc-error></rpc-reply>",
        ));

        let err = coordinator().apply(&mut tx, &[batch(100)]).unwrap_err();

        assert!(matches!(err, Error::StepFailed { step: Step::Lock, .. }));
        assert_eq!(tx.state(), TxState::Connected);
        assert_eq!(transcript.ops(), vec!["discard-changes", "lock"]);
    }

    #[test]
    fn test_commit_timeout_is_a_failure() {
        let (mut tx, transcript) = session(ScriptedSession::connected().time_out("commit"));

        let err = coordinator().apply(&mut tx, &[batch(100)]).unwrap_err();

        assert!(matches!(err, Error::StepFailed { step: Step::Commit, .. }));
        let ops = transcript.ops();
        assert_eq!(ops[ops.len() - 2..], ["discard-changes", "unlock"]);
    }

    #[test]
    fn test_unlock_failure_is_not_fatal() {
        let (mut tx, _) = session(ScriptedSession::connected().fail("unlock", ErrorCategory::Transport));

        coordinator().apply(&mut tx, &[batch(100)]).unwrap();
        assert_eq!(tx.state(), TxState::Unlocked);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (mut tx, transcript) = session(ScriptedSession::connected());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = TransactionCoordinator::new(cancel)
            .apply(&mut tx, &[batch(100)])
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(transcript.ops().is_empty());
    }

    #[test]
    fn test_drop_while_locked_releases_lock() {
        let (mut tx, transcript) = session(ScriptedSession::connected());
        tx.begin_change().unwrap();
        tx.apply_directives(&batch(100)).unwrap();
        drop(tx);

        assert_eq!(
            transcript.ops(),
            vec!["discard-changes", "lock", "edit-config", "discard-changes", "unlock"]
        );
    }

    #[test]
    fn test_steps_out_of_order() {
        let (mut tx, transcript) = session(ScriptedSession::connected());
        assert!(matches!(
            tx.validate(),
            Err(Error::InvalidTransition {
                from: TxState::Connected,
                to: TxState::Validated
            })
        ));
        tx.begin_change().unwrap();
        assert!(tx.commit().is_err());
        assert_eq!(transcript.count("commit"), 0);
    }

    #[test]
    fn test_reserve_then_enable() {
        let (mut tx, transcript) = session(ScriptedSession::connected());
        let coordinator = coordinator().with_confirm_timeout(Duration::from_secs(120));

        coordinator.reserve(&mut tx, &[batch(100)]).unwrap();
        assert_eq!(transcript.count("confirmed-commit"), 1);
        assert!(transcript.payloads("confirmed-commit")[0].contains("<confirm-timeout>120</confirm-timeout>"));
        assert_eq!(transcript.count("commit"), 0);

        coordinator.enable(&mut tx).unwrap();
        assert_eq!(transcript.count("commit"), 1);
        assert_eq!(tx.state(), TxState::Unlocked);
    }

    #[test]
    fn test_connect_failure_kind() {
        let script = ScriptedSession::new().fail_connect(ErrorCategory::CapabilityMismatch);
        let mut tx = TransactionSession::new("leaf1", Box::new(script), Arc::new(NetconfAdapter));
        assert_eq!(tx.state(), TxState::Disconnected);

        match tx.connect(&Credentials::new("10.0.0.11", 830, "admin")) {
            Err(Error::Connection(err)) => {
                assert_eq!(err.kind, crate::error::ConnectionErrorKind::CapabilityMismatch);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(tx.state(), TxState::Disconnected);
    }

    #[test]
    fn test_cli_locks_before_rollback() {
        let script = ScriptedSession::connected().default_reply("leaf1# ");
        let transcript = script.transcript();
        let mut tx = TransactionSession::new("leaf1", Box::new(script), Arc::new(CliAdapter::new()));

        coordinator().apply(&mut tx, &[batch(100)]).unwrap();

        let ops = transcript.ops();
        assert_eq!(ops[..2], ["lock", "discard-changes"]);
        assert_eq!(ops.last().map(String::as_str), Some("unlock"));
    }

    #[test]
    fn test_failed_rollback_releases_cli_lock() {
        let script = ScriptedSession::connected()
            .default_reply("leaf1# ")
            .respond("discard-changes", "error: configuration database modified");
        let transcript = script.transcript();
        let mut tx = TransactionSession::new("leaf1", Box::new(script), Arc::new(CliAdapter::new()));

        let err = coordinator().apply(&mut tx, &[batch(100)]).unwrap_err();

        assert!(matches!(err, Error::StepFailed { step: Step::DiscardChanges, .. }));
        assert_eq!(tx.state(), TxState::Connected);
        assert_eq!(transcript.ops(), vec!["lock", "discard-changes", "unlock"]);
    }

    #[test]
    fn test_get_config_and_disconnect() {
        let script = ScriptedSession::connected().respond(
            "get-config",
            "set system host-name \"leaf1\"\nset interfaces interface swp1 unit 100 vlan-id \"100\"\n",
        );
        let transcript = script.transcript();
        let mut tx = TransactionSession::new("leaf1", Box::new(script), Arc::new(CliAdapter::new()));

        let (text, tree) = tx.get_config().unwrap();
        assert!(text.starts_with("set system"));
        assert_eq!(
            tree.text(&TreePath::parse("interfaces/interface[swp1]/unit[100]/vlan-id").unwrap()),
            Some("100")
        );

        tx.disconnect();
        assert_eq!(tx.state(), TxState::Disconnected);
        assert_eq!(transcript.ops(), vec!["get-config", "close-session", "disconnect"]);
        assert!(tx.get_config().is_err());
    }
}
