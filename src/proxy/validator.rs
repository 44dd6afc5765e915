//! 节点结构校验与名称清理

use lazy_static::lazy_static;
use regex::Regex;
use std::net::Ipv6Addr;
use url::Url;

use super::Protocol;

/// 名称为空时使用的占位名
pub const UNNAMED_NODE: &str = "未命名节点";

/// 名称最大长度（按字符计）
pub const MAX_NAME_LEN: usize = 50;

lazy_static! {
    static ref IPV4_RE: Regex = Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").unwrap();
    static ref DOMAIN_RE: Regex =
        Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$").unwrap();
    static ref NAME_STRIP_RE: Regex = Regex::new(r"[^\w\s\-\.\(\)\[\]【】]").unwrap();
}

/// 订阅地址必须带 scheme 和 host
pub fn validate_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(u) => !u.scheme().is_empty() && u.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

pub fn validate_ip(ip: &str) -> bool {
    if IPV4_RE.is_match(ip) {
        return ip
            .split('.')
            .all(|part| part.parse::<u16>().is_ok_and(|n| n <= 255));
    }
    ip.parse::<Ipv6Addr>().is_ok()
}

pub fn validate_domain(domain: &str) -> bool {
    DOMAIN_RE.is_match(domain)
}

/// 端口以文本形式校验，这样 0 / 65536 这类越界值也能被如实拒绝
pub fn validate_port(port: &str) -> bool {
    match port.trim().parse::<i64>() {
        Ok(n) => (1..=65535).contains(&n),
        Err(_) => false,
    }
}

pub fn validate_protocol(protocol: &str) -> bool {
    protocol.parse::<Protocol>().is_ok()
}

/// 校验候选节点的协议、地址和端口
///
/// 任一字段为空、地址既不是 IP 也不是域名、端口越界或协议未知都返回 `false`，
/// 调用方据此直接丢弃候选项。
pub fn validate(protocol: &str, server: &str, port: &str) -> bool {
    if protocol.is_empty() || server.is_empty() || port.is_empty() {
        return false;
    }
    if !(validate_ip(server) || validate_domain(server)) {
        return false;
    }
    validate_port(port) && validate_protocol(protocol)
}

/// 清理节点名称：去掉白名单以外的字符，截断到 50 个字符，去除首尾空白
pub fn sanitize_name(raw: &str) -> String {
    let stripped = NAME_STRIP_RE.replace_all(raw, "");
    let truncated: String = stripped.chars().take(MAX_NAME_LEN).collect();
    let trimmed = truncated.trim();
    if trimmed.is_empty() {
        UNNAMED_NODE.to_string()
    } else {
        trimmed.to_string()
    }
}
