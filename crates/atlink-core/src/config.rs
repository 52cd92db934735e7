use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AtlinkConfigInput {
    pub version: u32,
    pub session: SessionConfigInput,
    pub timeouts: TimeoutConfigInput,
    pub modem: ModemConfigInput,
    pub ssh: SshConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfigInput {
    pub max_age_s: Option<u64>,
    pub sweep_interval_s: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeoutConfigInput {
    pub connect_s: Option<u64>,
    pub command_s: Option<u64>,
    pub diagnostic_s: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModemConfigInput {
    pub preview_command: Option<String>,
    pub diagnostic_commands: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SshConfigInput {
    pub program: Option<String>,
    pub sshpass_program: Option<String>,
    pub control_dir: Option<PathBuf>,
    pub host_key_policy: Option<HostKeyPolicy>,
}

/// OpenSSH `StrictHostKeyChecking` value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    Yes,
    No,
    #[default]
    AcceptNew,
}

impl HostKeyPolicy {
    pub fn as_ssh_option(self) -> &'static str {
        match self {
            HostKeyPolicy::Yes => "yes",
            HostKeyPolicy::No => "no",
            HostKeyPolicy::AcceptNew => "accept-new",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub connect: Duration,
    pub command: Duration,
    pub diagnostic: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            command: Duration::from_secs(15),
            diagnostic: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemConfig {
    /// Sent right after connecting; its output is the connect preview.
    pub preview_command: String,
    /// Run in order by the signal snapshot operation.
    pub diagnostic_commands: Vec<String>,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            preview_command: "ati".into(),
            diagnostic_commands: vec!["ATI".into(), "AT+GTCCINFO?".into(), "AT+GTCAINFO?".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub program: String,
    pub sshpass_program: String,
    /// Where ControlMaster sockets are created.
    pub control_dir: PathBuf,
    pub host_key_policy: HostKeyPolicy,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".into(),
            sshpass_program: "sshpass".into(),
            control_dir: std::env::temp_dir(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlinkConfig {
    pub version: u32,
    pub session: SessionConfig,
    pub timeouts: TimeoutConfig,
    pub modem: ModemConfig,
    pub ssh: SshConfig,
}

impl Default for AtlinkConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            session: SessionConfig::default(),
            timeouts: TimeoutConfig::default(),
            modem: ModemConfig::default(),
            ssh: SshConfig::default(),
        }
    }
}

fn seconds(name: &str, value: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::Invalid(format!("{name} must be positive"))),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl AtlinkConfigInput {
    pub fn resolve(self) -> Result<AtlinkConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {version}"
            )));
        }

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            max_age: seconds(
                "session.max_age_s",
                self.session.max_age_s,
                session_defaults.max_age,
            )?,
            sweep_interval: seconds(
                "session.sweep_interval_s",
                self.session.sweep_interval_s,
                session_defaults.sweep_interval,
            )?,
        };

        let timeout_defaults = TimeoutConfig::default();
        let timeouts = TimeoutConfig {
            connect: seconds(
                "timeouts.connect_s",
                self.timeouts.connect_s,
                timeout_defaults.connect,
            )?,
            command: seconds(
                "timeouts.command_s",
                self.timeouts.command_s,
                timeout_defaults.command,
            )?,
            diagnostic: seconds(
                "timeouts.diagnostic_s",
                self.timeouts.diagnostic_s,
                timeout_defaults.diagnostic,
            )?,
        };

        let modem_defaults = ModemConfig::default();
        let diagnostic_commands = match self.modem.diagnostic_commands {
            None => modem_defaults.diagnostic_commands,
            Some(commands) => {
                let kept: Vec<String> = commands
                    .into_iter()
                    .filter_map(|c| non_blank(Some(c)))
                    .collect();
                if kept.is_empty() {
                    return Err(ConfigError::Invalid(
                        "modem.diagnostic_commands must not be empty".into(),
                    ));
                }
                kept
            }
        };
        let modem = ModemConfig {
            preview_command: non_blank(self.modem.preview_command)
                .unwrap_or(modem_defaults.preview_command),
            diagnostic_commands,
        };

        let ssh_defaults = SshConfig::default();
        let ssh = SshConfig {
            program: non_blank(self.ssh.program).unwrap_or(ssh_defaults.program),
            sshpass_program: non_blank(self.ssh.sshpass_program)
                .unwrap_or(ssh_defaults.sshpass_program),
            control_dir: self.ssh.control_dir.unwrap_or(ssh_defaults.control_dir),
            host_key_policy: self.ssh.host_key_policy.unwrap_or_default(),
        };

        Ok(AtlinkConfig {
            version,
            session,
            timeouts,
            modem,
            ssh,
        })
    }
}

impl AtlinkConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(AtlinkConfig::default());
        }
        let parsed: AtlinkConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
