//! Scripted device double.
//!
//! [`ScriptedSession`] answers each request from a per-operation queue of
//! scripted outcomes and records every exchange in a shared [`Transcript`],
//! so a test can hand the session to the code under test and still inspect
//! what was sent afterwards.

use crate::error::{Error, ErrorCategory, Result};
use crate::session::DeviceSession;
use crate::types::{Credentials, Reply};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// One recorded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Operation name (`connect` and `disconnect` are recorded too)
    pub op: String,
    /// Request payload
    pub payload: String,
}

/// Shared record of everything a [`ScriptedSession`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<Exchange>>>);

impl Transcript {
    fn push(&self, op: &str, payload: &str) {
        self.0.lock().push(Exchange {
            op: op.to_string(),
            payload: payload.to_string(),
        });
    }

    /// All exchanges in order.
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.0.lock().clone()
    }

    /// Operation names in order.
    pub fn ops(&self) -> Vec<String> {
        self.0.lock().iter().map(|e| e.op.clone()).collect()
    }

    /// Number of requests with the given operation name.
    pub fn count(&self, op: &str) -> usize {
        self.0.lock().iter().filter(|e| e.op == op).count()
    }

    /// Payloads sent with the given operation name.
    pub fn payloads(&self, op: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.op == op)
            .map(|e| e.payload.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Reply(Reply),
    Timeout,
    Fail(ErrorCategory),
}

/// Device double driven by a script.
///
/// Requests with no scripted outcome get `default_reply`.
#[derive(Debug)]
pub struct ScriptedSession {
    connected: bool,
    connect_failure: Option<ErrorCategory>,
    script: HashMap<String, VecDeque<Outcome>>,
    default_reply: Reply,
    transcript: Transcript,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    /// Session that answers every request with `<ok/>`.
    pub fn new() -> Self {
        Self {
            connected: false,
            connect_failure: None,
            script: HashMap::new(),
            default_reply: Reply::ok("<ok/>"),
            transcript: Transcript::default(),
        }
    }

    /// Session that starts out connected.
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::new()
        }
    }

    fn push(mut self, op: &str, outcome: Outcome) -> Self {
        self.script.entry(op.to_string()).or_default().push_back(outcome);
        self
    }

    /// Queue a successful reply for the next `op` request.
    #[must_use]
    pub fn respond(self, op: &str, text: impl Into<String>) -> Self {
        self.push(op, Outcome::Reply(Reply::ok(text)))
    }

    /// Queue a reply the transport reports as failed.
    #[must_use]
    pub fn respond_failed(self, op: &str, text: impl Into<String>) -> Self {
        self.push(op, Outcome::Reply(Reply::failed(text)))
    }

    /// Make the next `op` request time out.
    #[must_use]
    pub fn time_out(self, op: &str) -> Self {
        self.push(op, Outcome::Timeout)
    }

    /// Make the next `op` request fail with a transport error of `category`.
    #[must_use]
    pub fn fail(self, op: &str, category: ErrorCategory) -> Self {
        self.push(op, Outcome::Fail(category))
    }

    /// Make `connect` fail.
    #[must_use]
    pub fn fail_connect(mut self, category: ErrorCategory) -> Self {
        self.connect_failure = Some(category);
        self
    }

    /// Reply used when nothing is scripted.
    #[must_use]
    pub fn default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Reply::ok(text);
        self
    }

    /// Handle on the shared transcript.
    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }
}

fn error_for(category: ErrorCategory, op: &str) -> Error {
    match category {
        ErrorCategory::Timeout => Error::Timeout {
            op: op.to_string(),
            after: Duration::ZERO,
        },
        ErrorCategory::NoResponse => Error::NoResponse {
            message: format!("scripted no response on {op}"),
        },
        ErrorCategory::CapabilityMismatch => Error::CapabilityMismatch {
            missing: "urn:ietf:params:netconf:base:1.0".to_string(),
            advertised: Vec::new(),
        },
        ErrorCategory::Transport => Error::Transport {
            message: format!("scripted transport failure on {op}"),
        },
        ErrorCategory::NotConnected => Error::NotConnected,
        ErrorCategory::Other => Error::Other(format!("scripted failure on {op}")),
    }
}

impl DeviceSession for ScriptedSession {
    fn connect(&mut self, _credentials: &Credentials) -> Result<()> {
        self.transcript.push("connect", "");
        if let Some(category) = self.connect_failure {
            return Err(error_for(category, "connect"));
        }
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, op: &str, payload: &str) -> Result<Reply> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.transcript.push(op, payload);

        let outcome = self.script.get_mut(op).and_then(VecDeque::pop_front);
        match outcome {
            Some(Outcome::Reply(reply)) => Ok(reply),
            Some(Outcome::Timeout) => Err(error_for(ErrorCategory::Timeout, op)),
            Some(Outcome::Fail(category)) => Err(error_for(category, op)),
            None => Ok(self.default_reply.clone()),
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        self.transcript.push("disconnect", "");
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
