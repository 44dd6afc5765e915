//! 宽松的 Base64 解码与各种编码变体
//!
//! 订阅里常见缺少补齐、混用 URL 安全字母表的情况，解码统一先按 URL 安全字母表、
//! 失败后再按标准字母表尝试，补齐位有无都接受。

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{self, GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;

use crate::error::{ParseError, ParseResult};

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// 去掉空白并把补齐修正到 4 的倍数
fn normalize(input: &str) -> String {
    let mut cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_string();
    let rem = cleaned.len() % 4;
    if rem != 0 {
        cleaned.push_str(&"=".repeat(4 - rem));
    }
    cleaned
}

pub fn decode_bytes(input: &str) -> ParseResult<Vec<u8>> {
    let cleaned = normalize(input);
    if cleaned.is_empty() {
        return Err(ParseError::Base64);
    }
    URL_SAFE_LENIENT
        .decode(&cleaned)
        .or_else(|_| STANDARD_LENIENT.decode(&cleaned))
        .map_err(|_| ParseError::Base64)
}

/// 解码为 UTF-8 文本
pub fn decode(input: &str) -> ParseResult<String> {
    let bytes = decode_bytes(input)?;
    String::from_utf8(bytes).map_err(|_| ParseError::Utf8)
}

/// 解码失败时原样返回输入（SSR 参数使用这种回退）
pub fn decode_or_raw(input: &str) -> String {
    decode(input).unwrap_or_else(|_| input.to_string())
}

/// URL 安全字母表、去掉补齐
pub fn encode_url_safe(input: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(input.as_bytes())
}

/// 标准字母表、保留补齐
pub fn encode_standard(input: &str) -> String {
    general_purpose::STANDARD.encode(input.as_bytes())
}
