//! 命令列參數

use std::path::PathBuf;

use clap::Parser;
use tncore::Charset;

#[derive(Debug, Parser)]
#[command(name = "tncli")]
#[command(about = "Minimal interactive Telnet client")]
#[command(version)]
pub struct Args {
    /// Remote host (overrides the profile)
    pub host: Option<String>,

    /// Remote port, default 23 (overrides the profile)
    pub port: Option<u16>,

    /// Login username; enables the username/password step after negotiation
    #[arg(short, long)]
    pub user: Option<String>,

    /// Login password
    #[arg(short = 'P', long, env = "TNCLI_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Profile name, loaded from <config dir>/tncli/profiles/<name>.json
    #[arg(long, conflicts_with = "config")]
    pub profile: Option<String>,

    /// Path to a profile JSON file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Connect timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Wire charset (utf-8, big5)
    #[arg(long)]
    pub charset: Option<Charset>,

    /// Regex matched against the reply to the password; a match fails the login
    #[arg(long)]
    pub login_failure: Option<String>,

    /// Only check whether the port is reachable, then exit
    #[arg(long)]
    pub probe: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write a hex dump of every byte sent and received to this file
    #[arg(long)]
    pub trace_file: Option<PathBuf>,
}
