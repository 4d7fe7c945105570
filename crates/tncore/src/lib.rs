//! Telnet Core Library
//!
//! 提供極簡 Telnet 客戶端的核心功能：
//! - `telnet`: 連線、固定序列協商握手、登入與收發迴圈
//! - `encoding`: UTF-8/Big5 編解碼
//! - `trace`: 原始位元組追蹤檔

pub mod encoding;
pub mod telnet;
pub mod trace;

pub use encoding::Charset;
pub use telnet::{
    Credentials, Endpoint, HandshakeConfig, SessionEnd, SessionIo, TelnetClient, TelnetConfig,
    TelnetError,
};
pub use trace::WireTrace;
