use sms_core::config::SegmentationConfig;
use sms_core::models::{Recipient, RenderedMessage};
use sms_core::DispatchResult;

use crate::segmenter::Segmenter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Field(String),
}

/// 解析后的短信模板
///
/// 占位符写作 `{field}`，字段名由字母、数字、`_` 和 `.` 组成；
/// `{{` 和 `}}` 表示字面量花括号，其余不成对的花括号原样保留。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    parts: Vec<TemplatePart>,
}

fn is_field_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

impl MessageTemplate {
    pub fn parse(body: &str) -> Self {
        let chars: Vec<char> = body.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    literal.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    literal.push('}');
                    i += 2;
                }
                '{' => {
                    let name_len = chars[i + 1..]
                        .iter()
                        .take_while(|c| is_field_char(**c))
                        .count();
                    let close = i + 1 + name_len;
                    if name_len > 0 && chars.get(close) == Some(&'}') {
                        if !literal.is_empty() {
                            parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                        }
                        parts.push(TemplatePart::Field(chars[i + 1..close].iter().collect()));
                        i = close + 1;
                    } else {
                        literal.push('{');
                        i += 1;
                    }
                }
                _ => {
                    literal.push(c);
                    i += 1;
                }
            }
        }

        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }

        Self { parts }
    }

    /// 模板中引用的字段，按首次出现顺序
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for part in &self.parts {
            if let TemplatePart::Field(name) = part {
                if !fields.contains(&name.as_str()) {
                    fields.push(name);
                }
            }
        }
        fields
    }

    /// 用收件人的字段替换占位符，缺失字段按空字符串处理并返回字段名
    pub fn substitute(&self, recipient: &Recipient) -> (String, Vec<String>) {
        let mut text = String::new();
        let mut missing: Vec<String> = Vec::new();

        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => text.push_str(s),
                TemplatePart::Field(name) => match lookup_field(recipient, name) {
                    Some(value) => text.push_str(value),
                    None => {
                        if !missing.contains(name) {
                            missing.push(name.clone());
                        }
                    }
                },
            }
        }

        (text, missing)
    }
}

fn lookup_field<'a>(recipient: &'a Recipient, name: &str) -> Option<&'a str> {
    match name {
        "name" => Some(recipient.name.as_str()),
        "phone" => Some(recipient.phone.as_str()),
        _ => recipient.fields.get(name).map(String::as_str),
    }
}

/// 短信渲染器
///
/// 相同的模板、收件人和参考号总是渲染出相同的短信。
#[derive(Debug, Clone, Default)]
pub struct MessageRenderer {
    segmenter: Segmenter,
}

impl MessageRenderer {
    pub fn new(config: SegmentationConfig) -> Self {
        Self {
            segmenter: Segmenter::new(config),
        }
    }

    pub fn render(
        &self,
        template: &MessageTemplate,
        recipient: &Recipient,
        reference: u16,
    ) -> DispatchResult<RenderedMessage> {
        let (text, missing_fields) = template.substitute(recipient);
        let (encoding, segments) = self.segmenter.split(&text, reference)?;

        Ok(RenderedMessage {
            text,
            encoding,
            segments,
            missing_fields,
        })
    }
}
