//! Session abstraction for device transports.
//!
//! The [`DeviceSession`] trait is the only thing the transaction layer sees
//! of a device, allowing for different implementations (a spawned transport
//! process, a scripted double for testing).

pub mod process;

use crate::error::Result;
use crate::types::{Credentials, Reply};

/// Transport to one device.
///
/// Every call blocks until the device answers or the session's timeout
/// expires; a timeout surfaces as [`crate::Error::Timeout`].
pub trait DeviceSession: Send {
    /// Open the transport and complete the greeting exchange.
    fn connect(&mut self, credentials: &Credentials) -> Result<()>;

    /// Send one request and wait for its reply.
    fn send(&mut self, op: &str, payload: &str) -> Result<Reply>;

    /// Close the transport.
    fn disconnect(&mut self) -> Result<()>;

    /// Whether `connect` succeeded and the transport is still open.
    fn is_connected(&self) -> bool;
}

impl<S: DeviceSession + ?Sized> DeviceSession for Box<S> {
    fn connect(&mut self, credentials: &Credentials) -> Result<()> {
        (**self).connect(credentials)
    }

    fn send(&mut self, op: &str, payload: &str) -> Result<Reply> {
        (**self).send(op, payload)
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
