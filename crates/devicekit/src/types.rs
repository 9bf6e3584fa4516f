//! Core types for device sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Login details for one device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Management address
    pub host: String,
    /// Management port
    pub port: u16,
    /// Login user
    pub username: String,
    /// Login password, if the transport needs one
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Credentials {
    /// Create credentials without a password.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: None,
        }
    }

    /// Attach a password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

// Keep passwords out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Answer to one request.
///
/// `ok` reflects the transport only. A reply can be `ok` and still carry an
/// error marker in `text`; detecting that is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Transport-level success
    pub ok: bool,
    /// Raw response text
    pub text: String,
}

impl Reply {
    /// Successful reply.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
        }
    }

    /// Reply the transport flagged as failed.
    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
        }
    }
}

/// How request and reply boundaries are found on the byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// NETCONF 1.0 end-of-message delimiter `]]>]]>`
    EndOfMessage,
    /// Interactive shell: a reply ends when the prompt is printed again
    Prompt(String),
}

impl Framing {
    /// NETCONF end-of-message delimiter.
    pub const EOM: &'static str = "]]>]]>";

    /// Delimiter that terminates a reply.
    pub fn delimiter(&self) -> &str {
        match self {
            Framing::EndOfMessage => Self::EOM,
            Framing::Prompt(prompt) => prompt,
        }
    }
}
