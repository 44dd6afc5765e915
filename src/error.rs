//! 单条数据的跳过原因
//!
//! 解析链接、转换 Clash 代理时任何一步失败都只会丢弃该条数据，
//! 这里的错误类型用于把“为什么被丢弃”带回批处理层统一计数和记录日志。

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("不支持的协议: {0}")]
    UnsupportedScheme(String),

    #[error("Base64 解码失败")]
    Base64,

    #[error("解码结果不是有效的 UTF-8")]
    Utf8,

    #[error("JSON 解析失败: {0}")]
    Json(String),

    #[error("链接格式错误: {0}")]
    Malformed(&'static str),

    #[error("节点校验失败: {0}")]
    InvalidNode(String),

    #[error("不支持的 Clash 代理类型: {0}")]
    UnsupportedProxyType(String),
}

pub type ParseResult<T> = Result<T, ParseError>;
