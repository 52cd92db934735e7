//! Session registry.
//!
//! A [`Session`] owns one live remote shell plus the metadata needed to
//! address the modem behind it. The [`SessionRegistry`] maps opaque tokens to
//! sessions and is shared by every request handler.
//!
//! Locking:
//! - the registry map sits behind a std mutex that is never held across an
//!   await; lookups clone the `Arc<Session>` out and release it;
//! - each session has a tokio `command_lock` so commands on one shell run one
//!   at a time and their output never interleaves;
//! - closing flips a watch flag, which wakes any command still waiting for
//!   the lock or for the remote side, so teardown never blocks on a hung
//!   command.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::ExecutionError;
use crate::token;
use crate::transport::{CommandOutput, ConnectTarget, ShellConnection};

/// Upper bound on releasing a remote shell.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ── Session ─────────────────────────────────────────────────────────

pub struct Session {
    token: String,
    connection: Box<dyn ShellConnection>,
    interface: String,
    target: ConnectTarget,
    created_at: DateTime<Utc>,
    command_lock: tokio::sync::Mutex<()>,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &token::fingerprint(&self.token))
            .field("interface", &self.interface)
            .field("target", &self.target)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    fn new(
        token: String,
        connection: Box<dyn ShellConnection>,
        target: ConnectTarget,
        interface: String,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Session {
            token,
            connection,
            interface,
            target,
            created_at: Utc::now(),
            command_lock: tokio::sync::Mutex::new(()),
            closed,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    pub fn host(&self) -> &str {
        &self.target.host
    }

    pub fn user(&self) -> &str {
        &self.target.user
    }

    pub fn port(&self) -> u16 {
        self.target.port
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Run one remote command, exclusive on this session.
    ///
    /// Fails with [`ExecutionError::SessionClosed`] if the session is closed
    /// before or while the command runs, and with
    /// [`ExecutionError::TimedOut`] when the remote side does not answer
    /// within `timeout`. The caller decides whether to tear down.
    pub async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(ExecutionError::SessionClosed);
        }

        let _guard = tokio::select! {
            guard = self.command_lock.lock() => guard,
            _ = wait_closed(&mut closed) => return Err(ExecutionError::SessionClosed),
        };
        if self.is_closed() {
            return Err(ExecutionError::SessionClosed);
        }

        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(ExecutionError::SessionClosed),
            result = tokio::time::timeout(timeout, self.connection.execute(command)) => {
                match result {
                    Ok(output) => output,
                    Err(_) => Err(ExecutionError::TimedOut(timeout)),
                }
            }
        }
    }

    /// Mark closed and release the remote shell. Only the first call
    /// reaches the connection.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let result = tokio::time::timeout(CLOSE_TIMEOUT, self.connection.close())
            .await
            .unwrap_or(Err(ExecutionError::TimedOut(CLOSE_TIMEOUT)));
        if let Err(err) = result {
            tracing::warn!(
                token = %token::fingerprint(&self.token),
                remote = %self.target,
                error = %err,
                "failed to close remote shell cleanly"
            );
        }
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    // Sender lives on the session, so this only returns once closed.
    let _ = rx.wait_for(|closed| *closed).await;
}

// ── Registry ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly opened connection under a new token.
    pub fn create(
        &self,
        connection: Box<dyn ShellConnection>,
        target: ConnectTarget,
        interface: impl Into<String>,
    ) -> Arc<Session> {
        let mut sessions = self.map();
        let mut token = token::generate();
        while sessions.contains_key(&token) {
            token = token::generate();
        }
        let session = Arc::new(Session::new(
            token.clone(),
            connection,
            target,
            interface.into(),
        ));
        sessions.insert(token, Arc::clone(&session));

        tracing::debug!(
            token = %token::fingerprint(session.token()),
            remote = %session.target,
            interface = %session.interface,
            live = sessions.len(),
            "session registered"
        );
        session
    }

    pub fn get(&self, token: &str) -> Option<Arc<Session>> {
        self.map().get(token).cloned()
    }

    /// Detach and close. Returns whether the token was live.
    pub async fn remove(&self, token: &str) -> bool {
        let detached = self.map().remove(token);
        match detached {
            Some(session) => {
                session.close().await;
                tracing::debug!(token = %token::fingerprint(token), "session removed");
                true
            }
            None => false,
        }
    }

    /// Remove sessions older than `max_age`.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        match Utc::now().checked_sub_signed(age) {
            Some(cutoff) => self.sweep_before(cutoff).await,
            None => 0,
        }
    }

    /// Remove every session created strictly before `cutoff`.
    pub async fn sweep_before(&self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.map();
            let tokens: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| session.created_at < cutoff)
                .map(|(token, _)| token.clone())
                .collect();
            tokens
                .iter()
                .filter_map(|token| sessions.remove(token))
                .collect()
        };

        for session in &expired {
            session.close().await;
            tracing::info!(
                token = %token::fingerprint(session.token()),
                remote = %session.target,
                created_at = %session.created_at,
                "session expired"
            );
        }
        expired.len()
    }

    /// Drain and close every session.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = self.map().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close().await;
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.map().keys().cloned().collect()
    }
}
