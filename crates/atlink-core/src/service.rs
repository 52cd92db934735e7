//! Service facade.
//!
//! The operations a request layer calls: open a session, relay an AT command,
//! pull a parsed signal snapshot, end a session. Any failure while a command
//! is running tears the session down so the client reconnects from a clean
//! shell.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::command;
use crate::config::AtlinkConfig;
use crate::error::{ExecutionError, ServiceError};
use crate::models::SignalSnapshot;
use crate::parser;
use crate::session::{Session, SessionRegistry};
use crate::token::fingerprint;
use crate::transport::{ConnectTarget, Credential, ShellTransport};

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Longest preview logged on connect.
const PREVIEW_LOG_CHARS: usize = 300;

// ── Requests ────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct ConnectRequest {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub interface: String,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &crate::transport::mask_secret(&self.password))
            .field("interface", &self.interface)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOpened {
    pub token: String,
    pub preview: String,
}

fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(PREVIEW_LOG_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

// ── Service ─────────────────────────────────────────────────────────

pub struct ModemService {
    registry: SessionRegistry,
    transport: Arc<dyn ShellTransport>,
    config: AtlinkConfig,
}

impl ModemService {
    pub fn new(transport: Arc<dyn ShellTransport>, config: AtlinkConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            transport,
            config,
        }
    }

    pub fn config(&self) -> &AtlinkConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Connect, register, and run the preview command.
    pub async fn create_session(
        &self,
        request: ConnectRequest,
    ) -> Result<SessionOpened, ServiceError> {
        let host = request.host.trim();
        let username = request.username.trim();
        let interface = request.interface.trim();

        let missing: Vec<&str> = [
            ("host", host.is_empty()),
            ("username", username.is_empty()),
            ("password", request.password.is_empty()),
            ("interface", interface.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(ServiceError::malformed(format!(
                "missing fields: {}",
                missing.join(", ")
            )));
        }
        if !command::is_valid_interface(interface) {
            return Err(ServiceError::malformed(format!(
                "invalid interface name: {interface}"
            )));
        }
        let port = request.port.unwrap_or(DEFAULT_SSH_PORT);
        if port == 0 {
            return Err(ServiceError::malformed("invalid port: 0"));
        }

        let target = ConnectTarget::new(host, port, username);
        let credential = Credential::new(request.password);
        tracing::info!(
            remote = %target,
            interface = %interface,
            password = %credential.masked(),
            "connection requested"
        );

        let connection = self
            .transport
            .connect(&target, &credential, self.config.timeouts.connect)
            .await
            .map_err(|err| {
                tracing::warn!(remote = %target, error = %err, "ssh connection failed");
                ServiceError::from(err)
            })?;
        drop(credential);

        let session = self.registry.create(connection, target, interface);
        let preview_command = &self.config.modem.preview_command;
        let preview = match self
            .execute_at(&session, preview_command, self.config.timeouts.command)
            .await
        {
            Ok(preview) => preview,
            Err(err) => {
                self.registry.remove(session.token()).await;
                tracing::warn!(
                    token = %fingerprint(session.token()),
                    remote = %session.target(),
                    command = %preview_command,
                    error = %err,
                    "preview command failed, session closed"
                );
                return Err(err.into());
            }
        };

        tracing::info!(
            token = %fingerprint(session.token()),
            remote = %session.target(),
            interface = %session.interface(),
            preview = %truncate_for_log(&preview),
            "session established"
        );

        let swept = self.registry.sweep(self.config.session.max_age).await;
        if swept > 0 {
            tracing::debug!(swept, "expired sessions removed after connect");
        }

        Ok(SessionOpened {
            token: session.token().to_string(),
            preview,
        })
    }

    /// Relay one AT command and return its combined output.
    pub async fn run_command(&self, token: &str, at_command: &str) -> Result<String, ServiceError> {
        let token = token.trim();
        let at_command = at_command.trim();
        if token.is_empty() || at_command.is_empty() {
            return Err(ServiceError::malformed("token or command missing"));
        }

        let session = self.lookup(token)?;
        tracing::info!(
            token = %fingerprint(token),
            remote = %session.target(),
            interface = %session.interface(),
            command = %at_command,
            "sending AT command"
        );

        let output = self
            .execute_or_teardown(&session, at_command, self.config.timeouts.command)
            .await?;
        tracing::info!(token = %fingerprint(token), command = %at_command, "command completed");
        Ok(output)
    }

    /// Run the diagnostic commands in order and merge their parses.
    pub async fn fetch_signal_snapshot(&self, token: &str) -> Result<SignalSnapshot, ServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::malformed("token missing"));
        }
        let session = self.lookup(token)?;

        let mut outputs = Vec::with_capacity(self.config.modem.diagnostic_commands.len());
        for at_command in &self.config.modem.diagnostic_commands {
            let output = self
                .execute_or_teardown(&session, at_command, self.config.timeouts.diagnostic)
                .await?;
            outputs.push(output);
        }

        let snapshot = parser::parse_all(outputs.iter().map(String::as_str));
        tracing::debug!(
            token = %fingerprint(token),
            cells = snapshot.cells.len(),
            quality = %snapshot.quality,
            bands = %snapshot.band_display,
            "signal snapshot parsed"
        );
        Ok(snapshot)
    }

    /// Close the session if it exists. Returns whether it did.
    pub async fn end_session(&self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }
        let removed = self.registry.remove(token).await;
        if removed {
            tracing::info!(token = %fingerprint(token), "session closed by client");
        }
        removed
    }

    /// Close every session.
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.close_all().await;
        tracing::info!(closed, "all sessions closed");
        closed
    }

    /// Periodically expire old sessions until `shutdown` flips to `true`.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.session.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = service.registry.sweep(service.config.session.max_age).await;
                        if swept > 0 {
                            tracing::info!(swept, live = service.registry.len(), "expired sessions removed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        })
    }

    fn lookup(&self, token: &str) -> Result<Arc<Session>, ServiceError> {
        self.registry.get(token).ok_or_else(|| {
            tracing::debug!(token = %fingerprint(token), "session not found");
            ServiceError::SessionNotFound
        })
    }

    async fn execute_at(
        &self,
        session: &Session,
        at_command: &str,
        timeout: Duration,
    ) -> Result<String, ExecutionError> {
        let wrapped = command::build(session.interface(), at_command);
        session
            .execute(&wrapped, timeout)
            .await
            .map(|output| output.combined())
    }

    async fn execute_or_teardown(
        &self,
        session: &Session,
        at_command: &str,
        timeout: Duration,
    ) -> Result<String, ServiceError> {
        match self.execute_at(session, at_command, timeout).await {
            Ok(output) => Ok(output),
            Err(err) => {
                self.registry.remove(session.token()).await;
                tracing::warn!(
                    token = %fingerprint(session.token()),
                    command = %at_command,
                    error = %err,
                    "command failed, session closed"
                );
                Err(err.into())
            }
        }
    }
}
