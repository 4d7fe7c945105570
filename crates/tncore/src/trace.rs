//! 線路追蹤
//!
//! 將握手與連線期間收發的原始位元組以十六進位寫入檔案，
//! 用來比對固定位移協商是否與伺服器的實際封包一致。

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

lazy_static::lazy_static! {
    static ref WIRE_TRACE: Mutex<Option<WireTrace>> = Mutex::new(None);
}

pub struct WireTrace {
    file: File,
}

impl WireTrace {
    /// 開啟追蹤檔（覆寫既有內容）
    pub fn init(path: impl AsRef<Path>) -> io::Result<()> {
        let file = File::create(path)?;
        if let Ok(mut trace) = WIRE_TRACE.lock() {
            *trace = Some(WireTrace { file });
        }
        Ok(())
    }

    pub fn is_enabled() -> bool {
        WIRE_TRACE.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    pub fn log(msg: &str) {
        if let Ok(mut trace) = WIRE_TRACE.lock() {
            if let Some(t) = trace.as_mut() {
                let _ = writeln!(t.file, "[{}] {}", unix_millis(), msg);
            }
        }
    }

    pub fn log_bytes(tag: &str, bytes: &[u8]) {
        if !Self::is_enabled() {
            return;
        }
        Self::log(&format!("{}: [{}]", tag, hex_dump(bytes)));
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
