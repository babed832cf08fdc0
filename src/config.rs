use clap::{Parser, ValueEnum};

use crate::error::{JoinError, JoinResult};
use crate::network::types::{SecurityKind, TargetNetwork};

/// wifijoin — deterministic Wi-Fi join/disconnect for automation harnesses
#[derive(Parser, Debug, Clone)]
#[command(name = "wifijoin", version, about, long_about = None)]
pub struct Cli {
    /// Run mode
    #[arg(long, value_enum, default_value_t = RunMode::Connect)]
    pub mode: RunMode,

    /// Target network name (required in connect mode)
    #[arg(long)]
    pub ssid: Option<String>,

    /// Password flavor; requires --password
    #[arg(long, value_enum)]
    pub password_type: Option<PasswordType>,

    /// Key material; requires --password-type
    #[arg(long)]
    pub password: Option<String>,

    /// Opaque tag echoed back in the completion signal
    #[arg(long, default_value = "")]
    pub uniq: String,

    /// Revoke this tool's administrative grant and exit
    #[arg(long, default_value_t = false)]
    pub clear_device_admin: bool,

    /// Log file path (diagnostics go to stderr if not specified)
    #[arg(long)]
    pub log: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PasswordType {
    #[value(name = "WEP")]
    Wep,
    #[value(name = "WPA")]
    Wpa,
}

impl PasswordType {
    fn security_kind(self) -> SecurityKind {
        match self {
            Self::Wep => SecurityKind::Wep,
            Self::Wpa => SecurityKind::Wpa,
        }
    }
}

/// A validated invocation: what the session will actually do.
#[derive(Debug, Clone)]
pub enum Invocation {
    Connect { target: TargetNetwork },
    Disconnect,
}

/// Check the parameter pairing rules before anything touches the network
/// stack.
pub fn validate(cli: &Cli) -> JoinResult<Invocation> {
    match cli.mode {
        RunMode::Disconnect => Ok(Invocation::Disconnect),
        RunMode::Connect => {
            let Some(ssid) = cli.ssid.clone() else {
                return Err(JoinError::Usage("connect mode requires --ssid".into()));
            };
            match (cli.password_type, &cli.password) {
                (Some(_), None) => Err(JoinError::Usage(
                    "--password-type given without --password".into(),
                )),
                (None, Some(_)) => Err(JoinError::Usage(
                    "--password given without --password-type".into(),
                )),
                (password_type, password) => Ok(Invocation::Connect {
                    target: TargetNetwork {
                        ssid,
                        security: password_type
                            .map(PasswordType::security_kind)
                            .unwrap_or(SecurityKind::None),
                        password: password.clone(),
                    },
                }),
            }
        }
    }
}

/// Usage message surfaced on validation failure.
pub fn usage() -> String {
    "Usage: wifijoin [--mode connect|disconnect] --ssid SSID \
     [--password-type WEP|WPA --password PASSWORD] [--uniq TAG]\n\
     If this tool was granted device-owner standing, revoke it with:\n    \
     wifijoin --clear-device-admin"
        .to_string()
}
