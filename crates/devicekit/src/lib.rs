//! # devicekit
//!
//! Sessions to network elements.
//!
//! This crate provides:
//! - The [`DeviceSession`] interface used by the transaction layer
//! - A process-backed session ([`ProcessSession`]) speaking NETCONF 1.0
//!   end-of-message framing or an interactive shell prompt, with a timeout
//!   on every step
//! - A scripted double ([`mock::ScriptedSession`]) for tests
//!
//! ## Example
//!
//! ```no_run
//! use devicekit::{Credentials, DeviceSession, Framing, ProcessSession, SessionOptions};
//! use std::time::Duration;
//!
//! let mut session = ProcessSession::new(SessionOptions {
//!     command: vec![
//!         "ssh".into(),
//!         "-p".into(),
//!         "{port}".into(),
//!         "{user}@{host}".into(),
//!         "-s".into(),
//!         "netconf".into(),
//!     ],
//!     framing: Framing::EndOfMessage,
//!     timeout: Duration::from_secs(30),
//! });
//!
//! session.connect(&Credentials::new("10.0.0.1", 830, "admin"))?;
//! let reply = session.send("get-config", "<rpc><get-config><source><running/></source></get-config></rpc>")?;
//! println!("{}", reply.text);
//! session.disconnect()?;
//! # Ok::<(), devicekit::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod mock;
pub mod session;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use session::DeviceSession;
pub use session::process::{ProcessSession, SessionOptions};
pub use types::{Credentials, Framing, Reply};
