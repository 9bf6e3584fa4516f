//! Runtime context shared by every component.
//!
//! A [`Context`] is built once at startup from the operator configuration
//! and handed to the driver and fleet constructors. Nothing in this crate
//! reads configuration from anywhere else.

use crate::model::ServiceType;
use crate::vendor::Vendor;
use devicekit::{Credentials, Framing, SessionOptions};
use serde::{Deserialize, Serialize};
use statestore::StateStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Engine-wide settings (`[settings]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Timeout of every device-facing step
    pub step_timeout_secs: u64,
    /// Automatic rollback delay of a reservation
    pub confirm_timeout_secs: u64,
    /// Compare the live configuration after each commit
    pub verify_after_commit: bool,
    /// Devices driven concurrently by a fleet run; 0 picks the CPU count
    pub jobs: usize,
    /// Location of the state database
    pub store_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            step_timeout_secs: 30,
            confirm_timeout_secs: 600,
            verify_after_commit: false,
            jobs: 0,
            store_path: None,
        }
    }
}

impl Settings {
    /// Step timeout as a duration.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Confirmed-commit timeout as a duration.
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

fn default_port() -> u16 {
    830
}

fn default_services() -> Vec<ServiceType> {
    ServiceType::ALL.to_vec()
}

/// One managed device (`[[devices]]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Device name, also the key of its persisted state
    pub name: String,
    /// Management address
    pub host: String,
    /// Management port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user
    pub username: String,
    /// Environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
    /// Device dialect
    #[serde(default)]
    pub vendor: Vendor,
    /// Free-form platform label
    #[serde(default)]
    pub platform: Option<String>,
    /// Service types this device accepts
    #[serde(default = "default_services")]
    pub services: Vec<ServiceType>,
    /// Session command; `{host}`, `{port}` and `{user}` are substituted
    #[serde(default)]
    pub command: Vec<String>,
    /// Shell prompt ending a reply (command-shell devices)
    #[serde(default)]
    pub prompt: Option<String>,
}

impl DeviceProfile {
    /// Profile with default port, dialect and services.
    pub fn new(name: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: default_port(),
            username: username.into(),
            password_env: None,
            vendor: Vendor::default(),
            platform: None,
            services: default_services(),
            command: Vec::new(),
            prompt: None,
        }
    }

    /// Whether the device accepts a service type.
    pub fn supports(&self, service: ServiceType) -> bool {
        self.services.contains(&service)
    }

    /// Login details; the password is read from `password_env` if set.
    pub fn credentials(&self) -> Credentials {
        let credentials = Credentials::new(&self.host, self.port, &self.username);
        match self.password_env.as_deref().map(std::env::var) {
            Some(Ok(password)) => credentials.with_password(password),
            Some(Err(_)) => {
                log::warn!(
                    "{}: password variable {} is not set",
                    self.name,
                    self.password_env.as_deref().unwrap_or_default()
                );
                credentials
            }
            None => credentials,
        }
    }

    /// Options of a process-backed session to this device.
    pub fn session_options(&self, timeout: Duration) -> SessionOptions {
        let framing = match self.vendor {
            Vendor::Netconf => Framing::EndOfMessage,
            Vendor::Cli => Framing::Prompt(self.prompt.clone().unwrap_or_else(|| "# ".to_string())),
        };
        SessionOptions {
            command: self.command.clone(),
            framing,
            timeout,
        }
    }
}

/// Cooperative cancellation flag, checked between transaction steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every holder of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a component needs, built once.
#[derive(Clone)]
pub struct Context {
    /// Engine settings
    pub settings: Settings,
    /// Managed devices
    pub devices: Vec<DeviceProfile>,
    /// Persisted-state store
    pub store: Arc<dyn StateStore>,
    /// Cancellation shared by all workers
    pub cancel: CancelToken,
}

impl Context {
    /// Assemble a context.
    pub fn new(settings: Settings, devices: Vec<DeviceProfile>, store: Arc<dyn StateStore>) -> Self {
        Self {
            settings,
            devices,
            store,
            cancel: CancelToken::new(),
        }
    }

    /// Profile of a device by name.
    pub fn device(&self, name: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find(|d| d.name == name)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("settings", &self.settings)
            .field("devices", &self.devices)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}
