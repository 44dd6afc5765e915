//! 协议相关的附加参数
//!
//! `Extras` 在边界上保持为字符串键的动态表（不同协议字段差异很大且稀疏），
//! 编码器统一通过 [`Transport`] / [`SsrOpts`] 等强类型视图读取，避免到处散落键名。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ExtraValue {
    /// 空字符串、0、false 都视为“未设置”
    pub fn is_truthy(&self) -> bool {
        match self {
            ExtraValue::Bool(b) => *b,
            ExtraValue::Int(n) => *n != 0,
            ExtraValue::Str(s) => !s.is_empty(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ExtraValue::Int(n) => Some(*n),
            ExtraValue::Str(s) => s.trim().parse().ok(),
            ExtraValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Bool(b) => write!(f, "{}", b),
            ExtraValue::Int(n) => write!(f, "{}", n),
            ExtraValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ExtraValue {
    fn from(s: &str) -> Self {
        ExtraValue::Str(s.to_string())
    }
}

impl From<String> for ExtraValue {
    fn from(s: String) -> Self {
        ExtraValue::Str(s)
    }
}

impl From<bool> for ExtraValue {
    fn from(b: bool) -> Self {
        ExtraValue::Bool(b)
    }
}

impl From<i64> for ExtraValue {
    fn from(n: i64) -> Self {
        ExtraValue::Int(n)
    }
}

/// 按键排序的附加参数表，迭代顺序与插入顺序无关
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extras(BTreeMap<String, ExtraValue>);

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ExtraValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// 仅在字符串非空时写入
    pub fn insert_non_empty(&mut self, key: impl Into<String>, value: &str) {
        if !value.is_empty() {
            self.0.insert(key.into(), ExtraValue::Str(value.to_string()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.0.get(key)
    }

    /// 以文本形式读取，缺省为空串
    pub fn text(&self, key: &str) -> String {
        self.0.get(key).map(|v| v.to_string()).unwrap_or_default()
    }

    /// 文本为空时返回给定默认值
    pub fn text_or(&self, key: &str, default: &str) -> String {
        let v = self.text(key);
        if v.is_empty() { default.to_string() } else { v }
    }

    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(ExtraValue::is_truthy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<ExtraValue>> FromIterator<(K, V)> for Extras {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut extras = Extras::new();
        for (k, v) in iter {
            extras.insert(k, v);
        }
        extras
    }
}

/// 传输层参数视图，vmess / vless / trojan 共用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub network: String,
    pub host: String,
    pub path: String,
    pub tls: bool,
    pub sni: String,
    pub alpn: String,
    pub allow_insecure: bool,
}

impl Transport {
    pub fn is_ws(&self) -> bool {
        self.network == "ws"
    }

    pub fn is_grpc(&self) -> bool {
        self.network == "grpc"
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            host: String::new(),
            path: String::new(),
            tls: false,
            sni: String::new(),
            alpn: String::new(),
            allow_insecure: false,
        }
    }
}

/// SSR 的协议与混淆参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrOpts {
    pub protocol: String,
    pub obfs: String,
    pub protocol_param: String,
    pub obfs_param: String,
}
