//! Session backed by a spawned transport process.
//!
//! The process (typically `ssh -s <host> netconf` or an interactive shell
//! login) is driven through its stdin/stdout. A reader thread splits stdout
//! into frames on the configured delimiter and hands them over a channel, so
//! every wait can be bounded with `recv_timeout`.
//!
//! A reply that arrives after its request timed out is still in the stream.
//! With end-of-message framing replies are matched to requests by
//! `message-id` and stale ones are dropped. A prompt-framed shell has no
//! such id, so a timeout there leaves the session desynchronized until the
//! next `connect`.

use crate::error::{Error, Result};
use crate::session::DeviceSession;
use crate::types::{Credentials, Framing, Reply};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Capability every NETCONF server must advertise in its hello.
pub const BASE_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.0";

const CLIENT_HELLO: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">\
<capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>\
</hello>";

/// Options for a process-backed session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Command template; `{host}`, `{port}` and `{user}` are substituted
    pub command: Vec<String>,
    /// Reply framing
    pub framing: Framing,
    /// Per-step timeout
    pub timeout: Duration,
}

/// Session that talks to a device through a child process.
pub struct ProcessSession {
    options: SessionOptions,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    frames: Option<Receiver<String>>,
    /// Requests that timed out and whose replies may still arrive
    late: usize,
    desynced: bool,
}

impl ProcessSession {
    /// Create an unconnected session.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            child: None,
            stdin: None,
            frames: None,
            late: 0,
            desynced: false,
        }
    }

    fn next_frame(&self, op: &str) -> Result<String> {
        let frames = self.frames.as_ref().ok_or(Error::NotConnected)?;
        match frames.recv_timeout(self.options.timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout {
                op: op.to_string(),
                after: self.options.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Transport {
                message: format!("session closed while waiting for {op}"),
            }),
        }
    }

    /// Wait for the reply to the request tagged `request_id`, dropping
    /// replies left over from requests that already timed out.
    fn await_reply(&mut self, op: &str, request_id: Option<&str>) -> Result<String> {
        let deadline = Instant::now() + self.options.timeout;
        loop {
            let frames = self.frames.as_ref().ok_or(Error::NotConnected)?;
            let frame = match frames.recv_deadline(deadline) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => {
                    self.late += 1;
                    return Err(Error::Timeout {
                        op: op.to_string(),
                        after: self.options.timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Transport {
                        message: format!("session closed while waiting for {op}"),
                    });
                }
            };

            let stale = match (request_id, message_id(&frame, "<rpc-reply")) {
                (Some(want), Some(got)) if want != got => {
                    log::debug!("Dropping stale reply {got} while waiting for {op} ({want})");
                    true
                }
                (_, None) if self.late > 0 => {
                    log::debug!("Dropping untagged reply while waiting for {op}");
                    true
                }
                _ => false,
            };
            if !stale {
                return Ok(frame);
            }
            self.late = self.late.saturating_sub(1);
        }
    }

    fn write_raw(&mut self, data: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(Error::NotConnected)?;
        stdin
            .write_all(data.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(|e| Error::Transport {
                message: format!("write failed: {e}"),
            })
    }

    /// Collect stderr of a child that exited before the greeting.
    fn failure_output(&mut self) -> String {
        let Some(mut child) = self.child.take() else {
            return String::new();
        };
        let _ = child.kill();
        let _ = child.wait();
        let mut output = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_string(&mut output);
        }
        output
    }

    fn greet(&mut self) -> Result<()> {
        let greeting = match self.next_frame("hello") {
            Ok(greeting) => greeting,
            Err(Error::Transport { .. }) => {
                let output = self.failure_output();
                return Err(Error::from_session_output(&output));
            }
            Err(e) => return Err(e),
        };

        if self.options.framing == Framing::EndOfMessage {
            let advertised = advertised_capabilities(&greeting);
            if advertised.is_empty() && !greeting.contains("<hello") {
                return Err(Error::NoResponse {
                    message: format!("expected hello, got: {}", greeting.trim()),
                });
            }
            if !advertised.iter().any(|c| c == BASE_CAPABILITY) {
                return Err(Error::CapabilityMismatch {
                    missing: BASE_CAPABILITY.to_string(),
                    advertised,
                });
            }
            self.write_raw(&format!("{CLIENT_HELLO}{}", Framing::EOM))?;
        }

        Ok(())
    }

    fn close(&mut self) {
        self.frames = None;
        // Closing stdin asks the transport to exit
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let deadline = Instant::now() + self.options.timeout;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => {
                        thread::sleep(Duration::from_millis(20));
                    }
                    _ => {
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                }
            }
        }
    }
}

impl DeviceSession for ProcessSession {
    fn connect(&mut self, credentials: &Credentials) -> Result<()> {
        if self.child.is_some() {
            self.close();
        }

        let argv = expand_command(&self.options.command, credentials);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::InvalidCommand("empty command".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(password) = &credentials.password {
            // Read by `sshpass -e`
            command.env("SSHPASS", password);
        }

        log::debug!("Spawning session: {}", argv.join(" "));
        let mut child = command.spawn().map_err(|e| Error::NoResponse {
            message: format!("failed to spawn {program}: {e}"),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other("child stdout not captured".to_string()))?;
        self.stdin = child.stdin.take();
        self.child = Some(child);
        self.frames = Some(spawn_reader(stdout, self.options.framing.delimiter().to_string()));
        self.late = 0;
        self.desynced = false;

        if let Err(e) = self.greet() {
            self.close();
            return Err(e);
        }

        log::info!("Connected to {}:{}", credentials.host, credentials.port);
        Ok(())
    }

    fn send(&mut self, op: &str, payload: &str) -> Result<Reply> {
        if self.frames.is_none() {
            return Err(Error::NotConnected);
        }

        match self.options.framing.clone() {
            Framing::EndOfMessage => {
                self.write_raw(&format!("{payload}\n{}\n", Framing::EOM))?;
                let reply = self.await_reply(op, message_id(payload, "<rpc "))?;
                Ok(Reply::ok(reply))
            }
            Framing::Prompt(_) => {
                if self.desynced {
                    return Err(Error::Desynchronized { op: op.to_string() });
                }
                // The shell prints its prompt after every line
                let mut text = String::new();
                for line in payload.lines().filter(|l| !l.trim().is_empty()) {
                    self.write_raw(&format!("{line}\n"))?;
                    match self.next_frame(op) {
                        Ok(frame) => text.push_str(&frame),
                        Err(e) => {
                            if matches!(e, Error::Timeout { .. }) {
                                self.desynced = true;
                            }
                            return Err(e);
                        }
                    }
                }
                Ok(Reply::ok(text))
            }
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.child.is_none() {
            return Err(Error::NotConnected);
        }
        self.close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.frames.is_some()
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Substitute credential placeholders in a command template.
pub fn expand_command(template: &[String], credentials: &Credentials) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{host}", &credentials.host)
                .replace("{port}", &credentials.port.to_string())
                .replace("{user}", &credentials.username)
        })
        .collect()
}

/// Capabilities listed in a hello message.
pub fn advertised_capabilities(hello: &str) -> Vec<String> {
    let mut caps = Vec::new();
    let mut rest = hello;
    while let Some(start) = rest.find("<capability>") {
        let after = &rest[start + "<capability>".len()..];
        let Some(end) = after.find("</capability>") else {
            break;
        };
        caps.push(after[..end].trim().to_string());
        rest = &after[end..];
    }
    caps
}

/// Value of the `message-id` attribute on the first tag starting with `opener`.
fn message_id<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    const ATTR: &str = "message-id=\"";
    let tag = &text[text.find(opener)?..];
    let tag = &tag[..tag.find('>')?];
    let value = &tag[tag.find(ATTR)? + ATTR.len()..];
    Some(&value[..value.find('"')?])
}

/// Split a byte stream into frames on `delimiter`, one channel message each.
fn spawn_reader<R: Read + Send + 'static>(mut source: R, delimiter: String) -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();

    thread::spawn(move || {
        let delim = delimiter.into_bytes();
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            pending.extend_from_slice(&chunk[..n]);

            while let Some(pos) = find_subslice(&pending, &delim) {
                let frame = String::from_utf8_lossy(&pending[..pos]).into_owned();
                pending.drain(..pos + delim.len());
                if tx.send(frame).is_err() {
                    return;
                }
            }
        }
        log::trace!("Session reader finished");
    });

    rx
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
