//! 节点数据模型

pub mod extra;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ParseError, ParseResult};
pub use extra::{ExtraValue, Extras, SsrOpts, Transport};
use validator::sanitize_name;

/// 支持的五种代理协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ss,
    Ssr,
    Vmess,
    Trojan,
    Vless,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ss => "ss",
            Protocol::Ssr => "ssr",
            Protocol::Vmess => "vmess",
            Protocol::Trojan => "trojan",
            Protocol::Vless => "vless",
        }
    }

    /// 链接前缀，例如 `vmess://`
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Ss => "ss://",
            Protocol::Ssr => "ssr://",
            Protocol::Vmess => "vmess://",
            Protocol::Trojan => "trojan://",
            Protocol::Vless => "vless://",
        }
    }

    /// 链接中没有备注时使用的名称
    pub fn default_name(&self) -> &'static str {
        match self {
            Protocol::Ss => "SS节点",
            Protocol::Ssr => "SSR节点",
            Protocol::Vmess => "VMess节点",
            Protocol::Trojan => "Trojan节点",
            Protocol::Vless => "VLESS节点",
        }
    }

    /// 按字面前缀识别链接协议（区分大小写）
    pub fn from_link(link: &str) -> Option<Protocol> {
        // ssr:// 要先于 ss:// 判断
        [
            Protocol::Ssr,
            Protocol::Ss,
            Protocol::Vmess,
            Protocol::Trojan,
            Protocol::Vless,
        ]
        .into_iter()
        .find(|p| link.starts_with(p.scheme()))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ss" => Ok(Protocol::Ss),
            "ssr" => Ok(Protocol::Ssr),
            "vmess" => Ok(Protocol::Vmess),
            "trojan" => Ok(Protocol::Trojan),
            "vless" => Ok(Protocol::Vless),
            _ => Err(ParseError::UnsupportedScheme(s.to_string())),
        }
    }
}

/// 规范化后的代理节点
///
/// 节点构造后即视为不可变值；名称只在构造时清理一次。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    pub password: String,
    pub method: String,
    pub name: String,
    pub extra: Extras,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_link: String,
}

impl Node {
    pub fn new(protocol: Protocol, server: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            server: server.into(),
            port,
            password: String::new(),
            method: String::new(),
            name: protocol.default_name().to_string(),
            extra: Extras::new(),
            raw_link: String::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = sanitize_name(name);
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<ExtraValue>) -> Self {
        self.extra.insert(key, value);
        self
    }

    pub fn with_extras(mut self, extra: Extras) -> Self {
        self.extra = extra;
        self
    }

    /// `server:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// VMess alterId，缺省为 0
    pub fn alter_id(&self) -> i64 {
        self.extra
            .get("aid")
            .and_then(ExtraValue::as_i64)
            .unwrap_or(0)
    }

    /// 传输层参数，各协议从各自的键读取
    pub fn transport(&self) -> Transport {
        let e = &self.extra;
        match self.protocol {
            Protocol::Vmess => Transport {
                network: e.text_or("net", "tcp"),
                host: e.text("host"),
                path: e.text("path"),
                tls: !matches!(e.text("tls").as_str(), "" | "none" | "false"),
                sni: e.text("sni"),
                alpn: e.text("alpn"),
                allow_insecure: e.flag("skip_cert_verify"),
            },
            Protocol::Vless => Transport {
                network: e.text_or("type", "tcp"),
                host: e.text("host"),
                path: e.text("path"),
                tls: e.text("security") == "tls",
                sni: e.text("sni"),
                alpn: e.text("alpn"),
                allow_insecure: e.flag("skip_cert_verify"),
            },
            Protocol::Trojan => Transport {
                network: e.text_or("type", "tcp"),
                host: e.text("host"),
                path: e.text("path"),
                tls: e.text_or("security", "tls") != "none",
                sni: e.text("sni"),
                alpn: e.text("alpn"),
                allow_insecure: e.flag("skip_cert_verify"),
            },
            Protocol::Ss | Protocol::Ssr => Transport::default(),
        }
    }

    pub fn ssr_opts(&self) -> SsrOpts {
        SsrOpts {
            protocol: self.extra.text_or("protocol", "origin"),
            obfs: self.extra.text_or("obfs", "plain"),
            protocol_param: self.extra.text("protocol_param"),
            obfs_param: self.extra.text("obfs_param"),
        }
    }
}

/// 尚未校验的节点候选项
///
/// 解析器先把文本字段原样装进候选项，端口也保留文本形式，
/// 只有通过 [`validator::validate`] 的候选项才能变成 [`Node`]。
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub protocol: String,
    pub server: String,
    pub port: String,
    pub password: String,
    pub method: String,
    pub name: String,
    pub extra: Extras,
    pub raw_link: String,
}

impl Candidate {
    pub fn new(protocol: Protocol, server: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            protocol: protocol.as_str().to_string(),
            server: server.into(),
            port: port.into(),
            name: protocol.default_name().to_string(),
            ..Default::default()
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// 空名称不覆盖协议默认名
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.name = name;
        }
        self
    }

    pub fn extra(mut self, extra: Extras) -> Self {
        self.extra = extra;
        self
    }

    pub fn raw_link(mut self, raw_link: impl Into<String>) -> Self {
        self.raw_link = raw_link.into();
        self
    }

    pub fn validate(&self) -> bool {
        validator::validate(&self.protocol, &self.server, &self.port)
    }

    pub fn into_node(self) -> ParseResult<Node> {
        if !self.validate() {
            return Err(ParseError::InvalidNode(format!(
                "{}://{}:{}",
                self.protocol, self.server, self.port
            )));
        }
        let protocol: Protocol = self.protocol.parse()?;
        let port: u16 = self
            .port
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidNode(format!("端口 {}", self.port)))?;

        Ok(Node {
            protocol,
            server: self.server,
            port,
            password: self.password,
            method: self.method,
            name: sanitize_name(&self.name),
            extra: self.extra,
            raw_link: self.raw_link,
        })
    }
}
