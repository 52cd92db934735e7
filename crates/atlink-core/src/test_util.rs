//! In-memory transport for tests.
//!
//! [`ScriptedTransport`] hands out connections whose replies come from a
//! responder closure. Every connection records a wire log of `start`/`end`
//! markers so tests can check that commands on one session never overlap,
//! and a shared [`Probe`] counts connects, closes and concurrency.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConnectionError, ExecutionError};
use crate::transport::{CommandOutput, ConnectTarget, Credential, ShellConnection, ShellTransport};

/// What a scripted connection does with one command.
#[derive(Debug, Clone)]
pub enum Step {
    Reply {
        stdout: String,
        stderr: String,
        delay: Duration,
    },
    Fail(String),
    /// Never answers; only a timeout or close ends the command.
    Hang,
}

impl Step {
    pub fn reply(stdout: impl Into<String>) -> Self {
        Self::delayed(stdout, Duration::ZERO)
    }

    pub fn delayed(stdout: impl Into<String>, delay: Duration) -> Self {
        Step::Reply {
            stdout: stdout.into(),
            stderr: String::new(),
            delay,
        }
    }

    pub fn with_stderr(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Step::Reply {
            stdout: stdout.into(),
            stderr: stderr.into(),
            delay: Duration::ZERO,
        }
    }
}

type Responder = Arc<dyn Fn(&str) -> Step + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn raise_max(max: &AtomicUsize, current: usize) {
    max.fetch_max(current, Ordering::SeqCst);
}

// ── Probes ──────────────────────────────────────────────────────────

/// Per-connection transcript.
#[derive(Debug, Default)]
pub struct WireLog {
    events: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl WireLog {
    fn push(&self, event: String) {
        lock(&self.events).push(event);
    }

    /// `start <cmd>` / `end <cmd>` markers in arrival order.
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Counters shared by every connection of one transport.
#[derive(Debug, Default)]
pub struct Probe {
    connects: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    executed: Mutex<Vec<String>>,
    credentials: Mutex<Vec<String>>,
    wires: Mutex<Vec<Arc<WireLog>>>,
}

impl Probe {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Highest number of commands running at once across all connections.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Raw command strings as received by the remote side.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    /// Passwords presented on connect, in order.
    pub fn credentials(&self) -> Vec<String> {
        lock(&self.credentials).clone()
    }

    /// Transcript of the `index`-th connection opened.
    ///
    /// Panics if fewer connections were opened.
    pub fn wire(&self, index: usize) -> Arc<WireLog> {
        Arc::clone(&lock(&self.wires)[index])
    }
}

/// Decrements in-flight counters when a command finishes or is cancelled.
struct Flight<'a> {
    probe: &'a Probe,
    wire: &'a WireLog,
}

impl<'a> Flight<'a> {
    fn enter(probe: &'a Probe, wire: &'a WireLog) -> Self {
        raise_max(
            &probe.max_in_flight,
            probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1,
        );
        raise_max(
            &wire.max_in_flight,
            wire.in_flight.fetch_add(1, Ordering::SeqCst) + 1,
        );
        Flight { probe, wire }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.wire.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ScriptedTransport {
    responder: Responder,
    probe: Arc<Probe>,
    reject: Option<String>,
    password: Option<String>,
    connect_delay: Duration,
    hang_on_close: bool,
}

impl ScriptedTransport {
    pub fn new(responder: impl Fn(&str) -> Step + Send + Sync + 'static) -> Self {
        ScriptedTransport {
            responder: Arc::new(responder),
            probe: Arc::new(Probe::default()),
            reject: None,
            password: None,
            connect_delay: Duration::ZERO,
            hang_on_close: false,
        }
    }

    /// Replies with the command it received.
    pub fn echo() -> Self {
        Self::new(|command| Step::reply(command))
    }

    /// Refuses every connection with `reason`.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        let mut transport = Self::echo();
        transport.reject = Some(reason.into());
        transport
    }

    /// Refuses connections whose password differs.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Connections whose `close` never returns.
    pub fn with_hanging_close(mut self) -> Self {
        self.hang_on_close = true;
        self
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }

    /// Open a connection directly, bypassing connect checks.
    pub fn connection(&self) -> Box<dyn ShellConnection> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        let wire = Arc::new(WireLog::default());
        lock(&self.probe.wires).push(Arc::clone(&wire));
        Box::new(ScriptedConnection {
            responder: Arc::clone(&self.responder),
            probe: Arc::clone(&self.probe),
            wire,
            hang_on_close: self.hang_on_close,
        })
    }
}

#[async_trait]
impl ShellTransport for ScriptedTransport {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn ShellConnection>, ConnectionError> {
        if !self.connect_delay.is_zero() {
            if self.connect_delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(ConnectionError::TimedOut(timeout));
            }
            tokio::time::sleep(self.connect_delay).await;
        }

        lock(&self.probe.credentials).push(credential.expose().to_string());
        if let Some(reason) = &self.reject {
            return Err(ConnectionError::Rejected {
                target: target.to_string(),
                reason: reason.clone(),
            });
        }
        if let Some(expected) = &self.password {
            if expected != credential.expose() {
                return Err(ConnectionError::Rejected {
                    target: target.to_string(),
                    reason: "authentication failed".into(),
                });
            }
        }
        Ok(self.connection())
    }
}

struct ScriptedConnection {
    responder: Responder,
    probe: Arc<Probe>,
    wire: Arc<WireLog>,
    hang_on_close: bool,
}

#[async_trait]
impl ShellConnection for ScriptedConnection {
    async fn execute(&self, command: &str) -> Result<CommandOutput, ExecutionError> {
        if self.wire.is_closed() {
            return Err(ExecutionError::Transport("connection closed".into()));
        }
        lock(&self.probe.executed).push(command.to_string());
        let step = (self.responder)(command);

        let _flight = Flight::enter(&self.probe, &self.wire);
        self.wire.push(format!("start {command}"));
        match step {
            Step::Reply {
                stdout,
                stderr,
                delay,
            } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.wire.push(format!("end {command}"));
                Ok(CommandOutput { stdout, stderr })
            }
            Step::Fail(reason) => {
                self.wire.push(format!("end {command}"));
                Err(ExecutionError::Transport(reason))
            }
            Step::Hang => std::future::pending::<Result<CommandOutput, ExecutionError>>().await,
        }
    }

    async fn close(&self) -> Result<(), ExecutionError> {
        if !self.wire.closed.swap(true, Ordering::SeqCst) {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
        }
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
