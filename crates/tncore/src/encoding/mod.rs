//! 字元集編解碼模組
//!
//! 遠端主機的輸出預設為 UTF-8，舊式設備常見 Big5。
//! 讀取端以串流解碼器處理，跨兩次 read 的多位元組字元不會被切壞。

use std::fmt;
use std::str::FromStr;

use encoding_rs::{Decoder, Encoding, BIG5, UTF_8};

/// 連線使用的字元集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Big5,
}

impl Charset {
    fn encoding(self) -> &'static Encoding {
        match self {
            Self::Utf8 => UTF_8,
            Self::Big5 => BIG5,
        }
    }

    /// 將 UTF-8 字串編碼為線路位元組（無法編碼的字元會被替換）
    ///
    /// # Example
    /// ```
    /// use tncore::encoding::Charset;
    ///
    /// assert_eq!(Charset::Big5.encode("你好"), vec![0xa7, 0x41, 0xa6, 0x6e]);
    /// ```
    pub fn encode(self, text: &str) -> Vec<u8> {
        let (encoded, _, _) = self.encoding().encode(text);
        encoded.into_owned()
    }

    /// 建立串流解碼器
    pub fn decoder(self) -> InboundDecoder {
        InboundDecoder {
            inner: self.encoding().new_decoder_without_bom_handling(),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8 => f.write_str("utf-8"),
            Self::Big5 => f.write_str("big5"),
        }
    }
}

impl FromStr for Charset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "big5" => Ok(Self::Big5),
            other => Err(format!("不支援的字元集: {}", other)),
        }
    }
}

/// 保留跨 chunk 狀態的解碼器
pub struct InboundDecoder {
    inner: Decoder,
}

impl InboundDecoder {
    /// 解碼一段位元組；尾端不完整的字元留待下一次呼叫
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.run(bytes, false)
    }

    /// 串流結束，殘留的不完整位元組以 U+FFFD 輸出
    pub fn finish(&mut self) -> String {
        self.run(&[], true)
    }

    fn run(&mut self, bytes: &[u8], last: bool) -> String {
        let capacity = self
            .inner
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 4);
        let mut out = String::with_capacity(capacity);
        let (_, _, _) = self.inner.decode_to_string(bytes, &mut out, last);
        out
    }
}

impl fmt::Debug for InboundDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundDecoder")
            .field("encoding", &self.inner.encoding().name())
            .finish()
    }
}
