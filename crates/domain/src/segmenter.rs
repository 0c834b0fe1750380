//! GSM-7 / UCS-2 编码判定和长短信拆分

use sms_core::config::SegmentationConfig;
use sms_core::models::{MessageEncoding, MessageSegment};
use sms_core::{DispatchError, DispatchResult};

/// GSM 03.38 基本字符集，不含 ESC
const GSM7_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";

/// GSM 03.38 扩展字符，每个占用转义符加字符本身两个位置
const GSM7_EXTENSION: &str = "\u{0C}^{}\\[~]|€";

fn gsm7_cost(c: char) -> Option<usize> {
    if GSM7_BASIC.contains(c) {
        Some(1)
    } else if GSM7_EXTENSION.contains(c) {
        Some(2)
    } else {
        None
    }
}

/// 选择能表示整段文本的编码
pub fn detect_encoding(text: &str) -> MessageEncoding {
    if text.chars().all(|c| gsm7_cost(c).is_some()) {
        MessageEncoding::Gsm7
    } else {
        MessageEncoding::Ucs2
    }
}

/// 单个字符在给定编码下占用的单位数：GSM-7 为 septet，UCS-2 为 UTF-16 码元
fn char_units(c: char, encoding: MessageEncoding) -> usize {
    match encoding {
        MessageEncoding::Gsm7 => gsm7_cost(c).unwrap_or(2),
        MessageEncoding::Ucs2 => c.len_utf16(),
    }
}

/// 文本在给定编码下的总长度
pub fn encoded_length(text: &str, encoding: MessageEncoding) -> usize {
    text.chars().map(|c| char_units(c, encoding)).sum()
}

/// 由活动ID和联系人ID确定性地生成长短信参考号
pub fn concat_reference(campaign_id: i64, contact_id: i64) -> u16 {
    // FNV-1a
    let mut hash: u32 = 0x811c_9dc5;
    for byte in campaign_id
        .to_be_bytes()
        .iter()
        .chain(contact_id.to_be_bytes().iter())
    {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    ((hash >> 16) ^ (hash & 0xffff)) as u16
}

/// 短信分段器
#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    config: SegmentationConfig,
}

impl Segmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    fn limits(&self, encoding: MessageEncoding) -> (usize, usize) {
        match encoding {
            MessageEncoding::Gsm7 => (
                self.config.gsm7_single_limit,
                self.config.gsm7_segment_limit,
            ),
            MessageEncoding::Ucs2 => (
                self.config.ucs2_single_limit,
                self.config.ucs2_segment_limit,
            ),
        }
    }

    /// 把文本切分为有序分段
    ///
    /// 按字符切分，扩展字符的转义对和 UTF-16 代理对不会被拆开。
    /// 分段数超过上限时返回 `MessageTooLong`。
    pub fn split(
        &self,
        text: &str,
        reference: u16,
    ) -> DispatchResult<(MessageEncoding, Vec<MessageSegment>)> {
        let encoding = detect_encoding(text);
        let (single_limit, segment_limit) = self.limits(encoding);

        let chunks: Vec<String> = if encoded_length(text, encoding) <= single_limit {
            vec![text.to_string()]
        } else {
            let mut chunks = Vec::new();
            let mut current = String::new();
            let mut used = 0;
            for c in text.chars() {
                let units = char_units(c, encoding);
                if used + units > segment_limit {
                    chunks.push(std::mem::take(&mut current));
                    used = 0;
                }
                current.push(c);
                used += units;
            }
            if !current.is_empty() {
                chunks.push(current);
            }
            chunks
        };

        if chunks.len() > self.config.max_segments {
            return Err(DispatchError::MessageTooLong {
                segments: chunks.len(),
                max: self.config.max_segments,
            });
        }

        let total = u8::try_from(chunks.len()).map_err(|_| DispatchError::MessageTooLong {
            segments: chunks.len(),
            max: self.config.max_segments,
        })?;

        let segments = chunks
            .into_iter()
            .zip(1..=total)
            .map(|(text, sequence)| MessageSegment {
                reference,
                sequence,
                total,
                text,
            })
            .collect();

        Ok((encoding, segments))
    }
}
