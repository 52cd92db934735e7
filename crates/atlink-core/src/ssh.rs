//! OpenSSH transport.
//!
//! Each session gets its own ControlMaster socket. Connecting starts a
//! backgrounded master through `sshpass` (password in the `SSHPASS`
//! environment variable, never on the command line); every command is a
//! short-lived `ssh -S <socket>` client multiplexed over that master; closing
//! asks the master to exit and removes the socket.
//!
//! Exit status conventions:
//! - `sshpass` 5: wrong password, 6: host key unknown or changed;
//! - `ssh` 255: transport failure (master gone, network down). Any other
//!   status is the remote command's own and its output is returned as is.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SshConfig;
use crate::error::{ConnectionError, ExecutionError};
use crate::token;
use crate::transport::{CommandOutput, ConnectTarget, Credential, ShellConnection, ShellTransport};

const SSH_TRANSPORT_FAILURE: i32 = 255;
const SSHPASS_BAD_PASSWORD: i32 = 5;
const SSHPASS_HOST_KEY: i32 = 6;

#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    config: SshConfig,
}

impl OpenSshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn control_path(&self) -> PathBuf {
        self.config
            .control_dir
            .join(format!("atlink-{}.sock", token::short_id()))
    }
}

fn destination_args(target: &ConnectTarget) -> Vec<OsString> {
    vec![
        "-p".into(),
        target.port.to_string().into(),
        "-l".into(),
        target.user.clone().into(),
        target.host.clone().into(),
    ]
}

/// Arguments for the backgrounded master, after the ssh program name.
fn master_args(
    config: &SshConfig,
    target: &ConnectTarget,
    socket: &Path,
    timeout: Duration,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-M".into(),
        "-S".into(),
        socket.into(),
        "-f".into(),
        "-N".into(),
    ];
    for option in [
        format!(
            "StrictHostKeyChecking={}",
            config.host_key_policy.as_ssh_option()
        ),
        format!("ConnectTimeout={}", timeout.as_secs().max(1)),
        "PubkeyAuthentication=no".to_string(),
        "PreferredAuthentications=password,keyboard-interactive".to_string(),
        "NumberOfPasswordPrompts=1".to_string(),
        "ServerAliveInterval=15".to_string(),
    ] {
        args.push("-o".into());
        args.push(option.into());
    }
    args.extend(destination_args(target));
    args
}

/// Arguments for one multiplexed command.
fn exec_args(socket: &Path, target: &ConnectTarget, command: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-S".into(),
        socket.into(),
        "-o".into(),
        "ControlMaster=no".into(),
        "-o".into(),
        "BatchMode=yes".into(),
    ];
    args.extend(destination_args(target));
    args.push("--".into());
    args.push(command.into());
    args
}

fn control_args(socket: &Path, target: &ConnectTarget, op: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-S".into(), socket.into(), "-O".into(), op.into()];
    args.extend(destination_args(target));
    args
}

/// Reason text for a failed master start.
fn describe_failure(code: Option<i32>, detail: &str) -> String {
    let reason = match code {
        Some(SSHPASS_BAD_PASSWORD) => "authentication failed".to_string(),
        Some(SSHPASS_HOST_KEY) => "host key unknown or changed".to_string(),
        Some(code) => format!("ssh exited with status {code}"),
        None => "ssh terminated by signal".to_string(),
    };
    if detail.is_empty() {
        reason
    } else {
        format!("{reason}: {detail}")
    }
}

fn last_log_line(path: &Path) -> String {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .last()
                .map(str::to_string)
        })
        .unwrap_or_default()
}

fn remove_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %err, "failed to remove ssh file");
        }
    }
}

#[async_trait]
impl ShellTransport for OpenSshTransport {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn ShellConnection>, ConnectionError> {
        let socket = self.control_path();
        let log_path = socket.with_extension("log");
        // The backgrounded master inherits stderr; a pipe would never close.
        let log = std::fs::File::create(&log_path).map_err(ConnectionError::Spawn)?;

        let mut cmd = Command::new(&self.config.sshpass_program);
        cmd.arg("-e")
            .arg(&self.config.program)
            .args(master_args(&self.config, target, &socket, timeout))
            .env("SSHPASS", credential.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                remove_quietly(&log_path);
                return Err(ConnectionError::Spawn(err));
            }
        };

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                remove_quietly(&log_path);
                return Err(ConnectionError::Spawn(err));
            }
            Err(_) => {
                drop(child);
                remove_quietly(&log_path);
                remove_quietly(&socket);
                return Err(ConnectionError::TimedOut(timeout));
            }
        };

        if !status.success() {
            let detail = last_log_line(&log_path);
            remove_quietly(&log_path);
            remove_quietly(&socket);
            return Err(ConnectionError::Rejected {
                target: target.to_string(),
                reason: describe_failure(status.code(), &detail),
            });
        }

        tracing::debug!(remote = %target, socket = %socket.display(), "control master started");
        Ok(Box::new(OpenSshConnection {
            program: self.config.program.clone(),
            target: target.clone(),
            socket,
            log_path,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct OpenSshConnection {
    program: String,
    target: ConnectTarget,
    socket: PathBuf,
    log_path: PathBuf,
    closed: AtomicBool,
}

impl OpenSshConnection {
    fn cleanup_files(&self) {
        remove_quietly(&self.socket);
        remove_quietly(&self.log_path);
    }
}

#[async_trait]
impl ShellConnection for OpenSshConnection {
    async fn execute(&self, command: &str) -> Result<CommandOutput, ExecutionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutionError::Transport("connection closed".into()));
        }

        let output = Command::new(&self.program)
            .args(exec_args(&self.socket, &self.target, command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ExecutionError::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_TRANSPORT_FAILURE) {
            let detail = stderr.trim();
            return Err(ExecutionError::Transport(if detail.is_empty() {
                format!("ssh exited with status {SSH_TRANSPORT_FAILURE}")
            } else {
                detail.to_string()
            }));
        }
        Ok(CommandOutput { stdout, stderr })
    }

    async fn close(&self) -> Result<(), ExecutionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let status = Command::new(&self.program)
            .args(control_args(&self.socket, &self.target, "exit"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        self.cleanup_files();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(ExecutionError::Transport(format!(
                "control master exit returned {status}"
            ))),
            Err(err) => Err(ExecutionError::Spawn(err)),
        }
    }
}

impl Drop for OpenSshConnection {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Not awaited: the master must not outlive its session. Inside a
        // runtime tokio reaps the dropped child; outside one, wait inline.
        let args = control_args(&self.socket, &self.target, "exit");
        let stopped = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let _enter = handle.enter();
                Command::new(&self.program)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map(drop)
            }
            Err(_) => std::process::Command::new(&self.program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(drop),
        };
        if let Err(err) = stopped {
            tracing::warn!(remote = %self.target, error = %err, "failed to stop control master");
        }
        remove_quietly(&self.log_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ConnectTarget {
        ConnectTarget::new("192.168.88.1", 2222, "admin")
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn master_args_shape() {
        let config = SshConfig::default();
        let args = strings(master_args(
            &config,
            &target(),
            Path::new("/tmp/s.sock"),
            Duration::from_secs(10),
        ));
        assert_eq!(&args[..5], ["-M", "-S", "/tmp/s.sock", "-f", "-N"]);
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"PubkeyAuthentication=no".to_string()));
        assert_eq!(
            &args[args.len() - 5..],
            ["-p", "2222", "-l", "admin", "192.168.88.1"]
        );
    }

    #[test]
    fn password_never_in_args() {
        let args = strings(master_args(
            &SshConfig::default(),
            &target(),
            Path::new("/tmp/s.sock"),
            Duration::from_secs(10),
        ));
        assert!(!args.iter().any(|a| a.contains("hunter2")));
    }

    #[test]
    fn exec_args_end_with_command() {
        let args = strings(exec_args(
            Path::new("/tmp/s.sock"),
            &target(),
            "/interface lte at-chat lte1 input=\"ati\"",
        ));
        assert_eq!(&args[..2], ["-S", "/tmp/s.sock"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        let n = args.len();
        assert_eq!(args[n - 2], "--");
        assert_eq!(args[n - 1], "/interface lte at-chat lte1 input=\"ati\"");
    }

    #[test]
    fn control_args_exit() {
        let args = strings(control_args(Path::new("/tmp/s.sock"), &target(), "exit"));
        assert_eq!(&args[..4], ["-S", "/tmp/s.sock", "-O", "exit"]);
    }

    #[test]
    fn failure_descriptions() {
        assert_eq!(describe_failure(Some(5), ""), "authentication failed");
        assert_eq!(
            describe_failure(Some(6), "Host key verification failed."),
            "host key unknown or changed: Host key verification failed."
        );
        assert_eq!(describe_failure(Some(255), ""), "ssh exited with status 255");
        assert_eq!(describe_failure(None, ""), "ssh terminated by signal");
    }

    #[test]
    fn control_sockets_are_distinct() {
        let transport = OpenSshTransport::new(SshConfig::default());
        assert_ne!(transport.control_path(), transport.control_path());
    }

    fn dropped_connection(program: &str) -> OpenSshConnection {
        OpenSshConnection {
            program: program.into(),
            target: target(),
            socket: std::env::temp_dir().join(format!("atlink-{}.sock", token::short_id())),
            log_path: std::env::temp_dir().join(format!("atlink-{}.log", token::short_id())),
            closed: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn drop_inside_runtime_stops_master() {
        let connection = dropped_connection("true");
        std::fs::write(&connection.log_path, "x").unwrap();
        let log_path = connection.log_path.clone();
        drop(connection);
        assert!(!log_path.exists());
    }

    #[test]
    fn drop_outside_runtime_waits_for_exit() {
        let connection = dropped_connection("true");
        std::fs::write(&connection.log_path, "x").unwrap();
        let log_path = connection.log_path.clone();
        drop(connection);
        assert!(!log_path.exists());
    }

    #[tokio::test]
    async fn missing_client_is_spawn_error() {
        let transport = OpenSshTransport::new(SshConfig {
            sshpass_program: "/nonexistent/sshpass".into(),
            ..SshConfig::default()
        });
        let result = transport
            .connect(
                &target(),
                &Credential::new("hunter2"),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(ConnectionError::Spawn(_))));
    }
}
