//! Remote AT-command sessions for router-embedded cellular modems.
//!
//! This crate contains:
//! - **Session registry**: token-keyed ownership of live remote-shell
//!   connections with per-session command serialization and expiry
//! - **Command wrapper**: RouterOS `at-chat` invocation builder
//! - **Vendor text parser**: diagnostic output → [`models::SignalSnapshot`]
//! - **Quality assessor**: coarse signal label from RSRP/RSRQ/SINR
//! - **Service facade**: the operations a request layer calls
//! - **OpenSSH transport**: the production [`transport::ShellTransport`]

pub mod command;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod quality;
pub mod service;
pub mod session;
pub mod ssh;
pub mod token;
pub mod transport;

pub mod test_util;
