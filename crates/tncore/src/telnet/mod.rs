//! Telnet 協定模組
//!
//! 連線建立、固定序列握手、收發迴圈與對外的客戶端介面

mod client;
pub mod connector;
pub mod handshake;
mod protocol;
pub mod session;

pub use client::{SessionIo, TelnetClient, TelnetConfig, TelnetError};
pub use connector::{ConnectError, Endpoint};
pub use handshake::{Credentials, HandshakeConfig, HandshakeError, HandshakeStep};
pub use protocol::{parse_telnet_data, TelnetCommand, TelnetEvent, TelnetOption, IAC};
pub use session::{SessionEnd, SessionError, SessionOptions};
