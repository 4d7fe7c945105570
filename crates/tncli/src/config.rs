//! 設定檔模組
//!
//! 每個 Profile 是一個 JSON 檔，描述一台主機的連線與登入資訊。
//! 命令列參數會覆寫 Profile 中的同名設定。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tncore::telnet::handshake::DEFAULT_AUTH_DELAY;
use tncore::{Charset, Credentials, Endpoint, HandshakeConfig, TelnetConfig};

use crate::args::Args;

const DEFAULT_PORT: u16 = 23;

/// 連線設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// 登入設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// 單一主機的完整設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// 連線逾時（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_charset")]
    pub charset: String,
    /// 送出帳號/密碼後的等待時間（毫秒）
    #[serde(default = "default_auth_delay_ms")]
    pub auth_delay_ms: u64,
    #[serde(default)]
    pub login_failure_pattern: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_charset() -> String {
    Charset::default().to_string()
}

fn default_auth_delay_ms() -> u64 {
    DEFAULT_AUTH_DELAY.as_millis() as u64
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            connection: ConnectionConfig::default(),
            auth: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            charset: default_charset(),
            auth_delay_ms: default_auth_delay_ms(),
            login_failure_pattern: None,
        }
    }
}

impl Profile {
    /// 從 JSON 檔載入
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("無法讀取設定檔 {}", path.display()))?;
        let profile = serde_json::from_str(&content)
            .with_context(|| format!("設定檔格式錯誤 {}", path.display()))?;
        Ok(profile)
    }

    /// 依名稱取得 Profile 檔案路徑
    pub fn path_for(name: &str) -> PathBuf {
        profiles_dir().join(format!("{}.json", name))
    }
}

/// 合併 Profile 與命令列參數後的最終設定
#[derive(Debug)]
pub struct Settings {
    pub endpoint: Endpoint,
    pub credentials: Option<Credentials>,
    pub connect_timeout: Duration,
    pub telnet: TelnetConfig,
}

impl Settings {
    pub fn resolve(args: &Args) -> Result<Self> {
        let profile = match (&args.config, &args.profile) {
            (Some(path), _) => Profile::load(path)?,
            (None, Some(name)) => Profile::load(&Profile::path_for(name))?,
            (None, None) => Profile::default(),
        };
        tracing::debug!("使用 Profile {}", profile.name);
        Self::merge(profile, args)
    }

    fn merge(profile: Profile, args: &Args) -> Result<Self> {
        let host = args
            .host
            .clone()
            .unwrap_or_else(|| profile.connection.host.clone());
        if host.trim().is_empty() {
            bail!("未指定主機：請給定 host 參數或在 Profile 中設定 connection.host");
        }
        let port = args.port.unwrap_or(profile.connection.port);

        let username = args
            .user
            .clone()
            .or_else(|| profile.auth.as_ref().map(|a| a.username.clone()));
        let password = args
            .password
            .clone()
            .or_else(|| profile.auth.as_ref().and_then(|a| a.password.clone()));
        let credentials = match (username, password) {
            (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
            (Some(user), None) => {
                bail!("帳號 {} 未提供密碼（--password 或 TNCLI_PASSWORD）", user)
            }
            (None, _) => None,
        };

        let charset = match args.charset {
            Some(charset) => charset,
            None => profile
                .charset
                .parse::<Charset>()
                .map_err(anyhow::Error::msg)?,
        };

        let login_failure = args
            .login_failure
            .clone()
            .or(profile.login_failure_pattern)
            .map(|pattern| {
                regex::Regex::new(&pattern)
                    .with_context(|| format!("登入失敗樣式無效: {}", pattern))
            })
            .transpose()?;

        let connect_timeout =
            Duration::from_secs(args.timeout.unwrap_or(profile.connect_timeout_secs));

        Ok(Self {
            endpoint: Endpoint::new(host, port),
            credentials,
            connect_timeout,
            telnet: TelnetConfig {
                charset,
                handshake: HandshakeConfig {
                    auth_delay: Duration::from_millis(profile.auth_delay_ms),
                    login_failure,
                },
                ..Default::default()
            },
        })
    }
}

/// 設定目錄
pub fn config_dir() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("tncli")
    } else {
        PathBuf::from(".")
    }
}

pub fn profiles_dir() -> PathBuf {
    config_dir().join("profiles")
}

// ============================================================================
// 測試
// ============================================================================
