//! Telnet 協定常數
//!
//! 握手引擎只使用 WILL/WONT/DONT 幾個固定值；
//! 解析器僅供除錯日誌辨識伺服器送來的協商內容，不參與流程控制。

/// Telnet IAC (Interpret As Command) - 0xFF
pub const IAC: u8 = 255;

/// Telnet 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// Sub-negotiation End
    Se = 240,
    Nop = 241,
    /// Go Ahead
    GoAhead = 249,
    /// Sub-negotiation Begin
    Sb = 250,
    Will = 251,
    Wont = 252,
    Do = 253,
    Dont = 254,
}

impl TelnetCommand {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            240 => Some(Self::Se),
            241 => Some(Self::Nop),
            249 => Some(Self::GoAhead),
            250 => Some(Self::Sb),
            251 => Some(Self::Will),
            252 => Some(Self::Wont),
            253 => Some(Self::Do),
            254 => Some(Self::Dont),
            _ => None,
        }
    }

    fn takes_option(self) -> bool {
        matches!(self, Self::Will | Self::Wont | Self::Do | Self::Dont)
    }
}

/// Telnet 選項（只列出常見於網路設備登入畫面的選項）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    Echo,
    SuppressGoAhead,
    Status,
    TerminalType,
    /// Window Size (NAWS)
    Naws,
    TerminalSpeed,
    RemoteFlowControl,
    Linemode,
    XDisplayLocation,
    NewEnviron,
    Unknown(u8),
}

impl TelnetOption {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Echo,
            3 => Self::SuppressGoAhead,
            5 => Self::Status,
            24 => Self::TerminalType,
            31 => Self::Naws,
            32 => Self::TerminalSpeed,
            33 => Self::RemoteFlowControl,
            34 => Self::Linemode,
            35 => Self::XDisplayLocation,
            39 => Self::NewEnviron,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Echo => 1,
            Self::SuppressGoAhead => 3,
            Self::Status => 5,
            Self::TerminalType => 24,
            Self::Naws => 31,
            Self::TerminalSpeed => 32,
            Self::RemoteFlowControl => 33,
            Self::Linemode => 34,
            Self::XDisplayLocation => 35,
            Self::NewEnviron => 39,
            Self::Unknown(b) => *b,
        }
    }
}

/// 解析出的 Telnet 事件
#[derive(Debug, Clone, PartialEq)]
pub enum TelnetEvent {
    /// WILL / WONT / DO / DONT 加選項
    Negotiate(TelnetCommand, TelnetOption),
    /// IAC SB <option> ... IAC SE
    Subnegotiation(TelnetOption, Vec<u8>),
    /// 其他兩位元組命令（NOP、GA ...）
    Command(u8),
}

/// 將資料流分離為純文字與 Telnet 事件
///
/// 結尾不完整的 IAC 序列會被略過。
pub fn parse_telnet_data(input: &[u8]) -> (Vec<u8>, Vec<TelnetEvent>) {
    let mut data = Vec::new();
    let mut events = Vec::new();
    let mut i = 0;

    while i < input.len() {
        if input[i] != IAC {
            data.push(input[i]);
            i += 1;
            continue;
        }

        let Some(&code) = input.get(i + 1) else {
            break;
        };

        if code == IAC {
            // IAC IAC = 轉義的 0xFF
            data.push(IAC);
            i += 2;
            continue;
        }

        match TelnetCommand::from_byte(code) {
            Some(cmd) if cmd.takes_option() => {
                let Some(&option) = input.get(i + 2) else {
                    break;
                };
                events.push(TelnetEvent::Negotiate(cmd, TelnetOption::from_byte(option)));
                i += 3;
            }
            Some(TelnetCommand::Sb) => {
                let Some(&option) = input.get(i + 2) else {
                    break;
                };
                let body_start = i + 3;
                let end = input[body_start..]
                    .windows(2)
                    .position(|w| w[0] == IAC && w[1] == TelnetCommand::Se as u8);
                match end {
                    Some(offset) => {
                        let body = input[body_start..body_start + offset].to_vec();
                        events.push(TelnetEvent::Subnegotiation(
                            TelnetOption::from_byte(option),
                            body,
                        ));
                        i = body_start + offset + 2;
                    }
                    None => break,
                }
            }
            _ => {
                events.push(TelnetEvent::Command(code));
                i += 2;
            }
        }
    }

    (data, events)
}
