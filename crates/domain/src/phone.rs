const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

/// 规范化手机号
///
/// 去掉空格和 `-().` 分隔符，保留开头的 `+`。
/// 号码无效时返回 `None`：含有其他字符、位数不在10到15之间，
/// 或者是全0、全1、`1234567890` 这类明显的占位号码。
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '\t' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
        return None;
    }

    if digits.chars().all(|c| c == '0')
        || digits.chars().all(|c| c == '1')
        || digits == "1234567890"
    {
        return None;
    }

    Some(if plus { format!("+{digits}") } else { digits })
}

/// 去重和退订匹配使用的号码键，只保留数字
///
/// `+15551234567` 和 `15551234567` 视为同一个号码。
pub fn phone_key(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}
