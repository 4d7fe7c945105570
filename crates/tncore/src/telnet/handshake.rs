//! 固定序列協商握手
//!
//! 這不是通用的 Telnet 選項協商器：它假設伺服器一定送出三輪
//! 版面固定的協商封包，每輪把收到的封包原樣回送，只在固定位移上
//! 改寫回應碼；第四輪只讀不寫。之後視需要送出帳號與密碼。

use std::fmt;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::protocol::{parse_telnet_data, TelnetCommand};
use crate::encoding::Charset;
use crate::trace::WireTrace;

/// 握手讀取緩衝區大小
pub const HANDSHAKE_BUFFER_SIZE: usize = 4096;

/// 送出帳號/密碼後等待提示符推進的時間
pub const DEFAULT_AUTH_DELAY: Duration = Duration::from_millis(500);

const WILL: u8 = TelnetCommand::Will as u8;
const WONT: u8 = TelnetCommand::Wont as u8;
const DONT: u8 = TelnetCommand::Dont as u8;

/// 三輪協商各自要覆寫的 (位移, 回應碼)
///
/// 第二輪混用 WILL/DONT：同意其中一個選項、拒絕伺服器的另一個提議。
pub const NEGOTIATION_ROUNDS: [&[(usize, u8)]; 3] = [
    &[(1, WONT), (4, WONT), (7, WONT), (10, WONT)],
    &[(1, WONT), (4, WILL), (7, WONT), (10, DONT), (13, WONT)],
    &[(1, WONT), (4, WONT)],
];

/// 握手進行到的步驟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// 第 1~3 輪協商
    Negotiation(u8),
    /// 第四次讀取（只讀不寫）
    Drain,
    Username,
    Password,
}

impl HandshakeStep {
    fn trace_tag(self) -> String {
        match self {
            Self::Negotiation(round) => format!("ROUND{}", round),
            Self::Drain => "DRAIN".to_string(),
            Self::Username => "USERNAME".to_string(),
            Self::Password => "PASSWORD".to_string(),
        }
    }
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negotiation(round) => write!(f, "協商第 {} 輪", round),
            Self::Drain => f.write_str("協商收尾"),
            Self::Username => f.write_str("帳號"),
            Self::Password => f.write_str("密碼"),
        }
    }
}

/// 握手錯誤
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("握手讀取失敗（{step}）: {source}")]
    Read {
        step: HandshakeStep,
        #[source]
        source: io::Error,
    },

    #[error("握手寫入失敗（{step}）: {source}")]
    Write {
        step: HandshakeStep,
        #[source]
        source: io::Error,
    },

    #[error("握手期間遠端關閉連線（{step}）")]
    PeerClosed { step: HandshakeStep },

    #[error("登入被拒絕")]
    LoginRejected,
}

impl HandshakeError {
    /// 失敗發生的步驟
    pub fn step(&self) -> Option<HandshakeStep> {
        match self {
            Self::Read { step, .. } | Self::Write { step, .. } | Self::PeerClosed { step } => {
                Some(*step)
            }
            Self::LoginRejected => None,
        }
    }
}

/// 登入帳號密碼
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 握手設定
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub auth_delay: Duration,
    /// 密碼送出後的回應若符合此樣式即視為登入失敗；`None` 時不檢查
    pub login_failure: Option<Regex>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            auth_delay: DEFAULT_AUTH_DELAY,
            login_failure: None,
        }
    }
}

/// 依規則覆寫一輪封包；超出封包長度的位移直接略過
pub fn patch_round(buf: &mut [u8], rules: &[(usize, u8)]) {
    for &(offset, value) in rules {
        if let Some(byte) = buf.get_mut(offset) {
            *byte = value;
        }
    }
}

/// 執行固定序列握手
///
/// 任一步驟的讀寫錯誤都會立刻中止，後續協商與登入不會執行。
/// 未設定 `login_failure` 時不驗證登入結果，只要傳輸層沒有出錯就視為成功。
pub async fn handshake<S>(
    stream: &mut S,
    credentials: Option<&Credentials>,
    config: &HandshakeConfig,
    charset: Charset,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(HANDSHAKE_BUFFER_SIZE);

    for (index, rules) in NEGOTIATION_ROUNDS.iter().enumerate() {
        let step = HandshakeStep::Negotiation(index as u8 + 1);
        read_step(stream, &mut buf, step).await?;
        log_offered(step, &buf);
        patch_round(&mut buf, rules);
        write_step(stream, &buf, step).await?;
    }

    read_step(stream, &mut buf, HandshakeStep::Drain).await?;
    log_offered(HandshakeStep::Drain, &buf);

    let Some(credentials) = credentials else {
        debug!("協商完成（未啟用認證）");
        return Ok(());
    };

    submit(stream, &mut buf, &credentials.username, HandshakeStep::Username, config, charset)
        .await?;
    submit(stream, &mut buf, &credentials.password, HandshakeStep::Password, config, charset)
        .await?;

    if let Some(pattern) = &config.login_failure {
        let reply = charset.decoder().decode(&buf);
        if pattern.is_match(&reply) {
            warn!("登入失敗，遠端回應: {:?}", reply.trim());
            return Err(HandshakeError::LoginRejected);
        }
    }

    info!("已送出登入資訊（帳號 {}）", credentials.username());
    Ok(())
}

async fn submit<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    value: &str,
    step: HandshakeStep,
    config: &HandshakeConfig,
    charset: Charset,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = charset.encode(value);
    line.push(b'\n');
    write_step(stream, &line, step).await?;

    tokio::time::sleep(config.auth_delay).await;

    read_step(stream, buf, step).await
}

async fn read_step<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    step: HandshakeStep,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    buf.clear();
    match stream.read_buf(buf).await {
        Ok(0) => Err(HandshakeError::PeerClosed { step }),
        Ok(_) => {
            WireTrace::log_bytes(&format!("{} READ", step.trace_tag()), buf);
            Ok(())
        }
        Err(source) => Err(HandshakeError::Read { step, source }),
    }
}

async fn write_step<S>(stream: &mut S, bytes: &[u8], step: HandshakeStep) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    if step == HandshakeStep::Password {
        WireTrace::log("PASSWORD WRITE: <redacted>");
    } else {
        WireTrace::log_bytes(&format!("{} WRITE", step.trace_tag()), bytes);
    }

    stream
        .write_all(bytes)
        .await
        .map_err(|source| HandshakeError::Write { step, source })?;
    stream
        .flush()
        .await
        .map_err(|source| HandshakeError::Write { step, source })
}

fn log_offered(step: HandshakeStep, buf: &[u8]) {
    let (_, events) = parse_telnet_data(buf);
    debug!("{}: 收到 {} 位元組，協商 {:?}", step, buf.len(), events);
}
