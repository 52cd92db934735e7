//! Remote-shell capability traits.
//!
//! The session layer only needs "open a shell" and "run a command, get
//! stdout and stderr". Everything else about the wire protocol lives behind
//! [`ShellTransport`] and [`ShellConnection`], so the registry and service
//! can be driven by [`crate::ssh::OpenSshTransport`] in production and by
//! [`crate::test_util::ScriptedTransport`] in tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::{ConnectionError, ExecutionError};

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        ConnectTarget {
            host: host.into(),
            port,
            user: user.into(),
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Password for one connection attempt. Wiped on drop, never printed.
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Credential(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Log-safe rendering, see [`mask_secret`].
    pub fn masked(&self) -> String {
        mask_secret(self.expose())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// `<empty>`, one `*` per character for secrets of up to four characters,
/// otherwise first and last character with the length: `a***z (len=8)`.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.as_slice() {
        [] => "<empty>".to_string(),
        [first, .., last] if chars.len() > 4 => {
            format!("{first}***{last} (len={})", chars.len())
        }
        _ => "*".repeat(chars.len()),
    }
}

/// Output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout, then stderr on a new line when stderr is non-empty.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Opens authenticated remote shells.
#[async_trait]
pub trait ShellTransport: Send + Sync {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn ShellConnection>, ConnectionError>;
}

/// One live remote shell.
///
/// Implementations must tolerate `close` being called more than once and
/// `execute` being attempted after `close` (it fails).
#[async_trait]
pub trait ShellConnection: Send + Sync {
    async fn execute(&self, command: &str) -> Result<CommandOutput, ExecutionError>;

    async fn close(&self) -> Result<(), ExecutionError>;
}
