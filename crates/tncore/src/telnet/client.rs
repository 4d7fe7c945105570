//! Telnet 客戶端
//!
//! 串起連線、握手與收發迴圈；呼叫端透過 [`SessionIo`] 送命令、收輸出，
//! 並以注入的 `CancellationToken` 結束連線。

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::connector::{self, ConnectError, Endpoint};
use super::handshake::{self, Credentials, HandshakeConfig, HandshakeError};
use super::session::{self, SessionEnd, SessionError, SessionOptions};
use crate::encoding::Charset;

/// Telnet 客戶端錯誤
#[derive(Debug, Error)]
pub enum TelnetError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Telnet 客戶端配置
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// 讀取緩衝區大小
    pub read_buffer_size: usize,
    pub charset: Charset,
    pub handshake: HandshakeConfig,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            charset: Charset::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

/// 呼叫端持有的命令發送端與輸出接收端
#[derive(Debug)]
pub struct SessionIo {
    pub commands: mpsc::UnboundedSender<String>,
    pub output: mpsc::UnboundedReceiver<String>,
}

/// Telnet 客戶端
///
/// `telnet` 會消耗客戶端本身，一個客戶端只跑一次握手與一次收發迴圈。
#[derive(Debug)]
pub struct TelnetClient {
    endpoint: Endpoint,
    /// 有值即啟用登入
    credentials: Option<Credentials>,
    config: TelnetConfig,
    commands: mpsc::UnboundedReceiver<String>,
    output: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl TelnetClient {
    /// 創建新的 Telnet 客戶端
    pub fn new(
        endpoint: Endpoint,
        credentials: Option<Credentials>,
        config: TelnetConfig,
    ) -> (Self, SessionIo) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let client = Self {
            endpoint,
            credentials,
            config,
            commands: cmd_rx,
            output: out_tx,
            cancel: CancellationToken::new(),
        };
        let io = SessionIo {
            commands: cmd_tx,
            output: out_rx,
        };
        (client, io)
    }

    /// 改用外部提供的取消信號
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_auth(&self) -> bool {
        self.credentials.is_some()
    }

    /// 探測主機是否可連線
    pub async fn is_open(&self, timeout: Duration) -> bool {
        connector::probe(&self.endpoint, timeout).await
    }

    /// 連線、握手並執行收發迴圈，回傳第一個遇到的錯誤
    ///
    /// 連線與握手期間也會回應取消信號，此時回傳 `SessionEnd::Cancelled`。
    pub async fn telnet(self, timeout: Duration) -> Result<SessionEnd, TelnetError> {
        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                info!("連線 {} 前已取消", self.endpoint);
                return Ok(SessionEnd::Cancelled);
            }
            stream = connector::connect(&self.endpoint, timeout) => stream?,
        };

        let negotiated = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                info!("握手期間收到取消信號，關閉與 {} 的連線", self.endpoint);
                return Ok(SessionEnd::Cancelled);
            }
            result = handshake::handshake(
                &mut stream,
                self.credentials.as_ref(),
                &self.config.handshake,
                self.config.charset,
            ) => result,
        };
        if let Err(e) = negotiated {
            error!("與 {} 握手失敗: {}", self.endpoint, e);
            return Err(e.into());
        }
        info!("與 {} 握手完成", self.endpoint);

        let options = SessionOptions {
            charset: self.config.charset,
            read_buffer_size: self.config.read_buffer_size,
        };
        let end =
            session::run_session(stream, self.commands, self.output, self.cancel, options).await?;

        info!("對話正常結束（{:?}）", end);
        Ok(end)
    }
}
