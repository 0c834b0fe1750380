use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 短信编码方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageEncoding {
    /// GSM 03.38 7位默认字母表
    Gsm7,
    /// UTF-16 编码，用于无法用 GSM-7 表示的文本
    Ucs2,
}

impl MessageEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageEncoding::Gsm7 => "gsm7",
            MessageEncoding::Ucs2 => "ucs2",
        }
    }
}

impl fmt::Display for MessageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gsm7" => Ok(MessageEncoding::Gsm7),
            "ucs2" => Ok(MessageEncoding::Ucs2),
            _ => Err(format!("Invalid message encoding: {s}")),
        }
    }
}

/// 长短信的一个分段
///
/// `reference` 在同一条消息的所有分段中相同，`sequence` 从1开始。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSegment {
    pub reference: u16,
    pub sequence: u8,
    pub total: u8,
    pub text: String,
}

/// 为单个收件人渲染好的短信
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub encoding: MessageEncoding,
    pub segments: Vec<MessageSegment>,
    /// 渲染时缺失的合并字段，已按空字符串处理
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

impl RenderedMessage {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_multipart(&self) -> bool {
        self.segments.len() > 1
    }
}
