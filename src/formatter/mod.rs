//! 输出文档生成、统计信息与文件写入

use anyhow::Context;
use chrono::{DateTime, Local};
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use serde_yaml::Mapping;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::codec::{self, b64, clash, quantumult, surge, v2ray};
use crate::proxy::Node;

pub const STATS_FILE: &str = "stats.json";
pub const LATEST_LINK: &str = "latest";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Base64,
    Clash,
    V2ray,
    Surge,
    Quantumult,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Base64,
        OutputFormat::Clash,
        OutputFormat::V2ray,
        OutputFormat::Surge,
        OutputFormat::Quantumult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Base64 => "base64",
            OutputFormat::Clash => "clash",
            OutputFormat::V2ray => "v2ray",
            OutputFormat::Surge => "surge",
            OutputFormat::Quantumult => "quantumult",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            OutputFormat::Base64 => "nodes.txt",
            OutputFormat::Clash => "clash.yaml",
            OutputFormat::V2ray => "v2ray.json",
            OutputFormat::Surge => "surge.conf",
            OutputFormat::Quantumult => "quantumult.conf",
        }
    }

    /// 解析配置中的格式列表，不认识的格式跳过并警告
    pub fn parse_list(names: &[String]) -> Vec<OutputFormat> {
        let mut formats = Vec::new();
        for name in names {
            match name.parse::<OutputFormat>() {
                Ok(f) if !formats.contains(&f) => formats.push(f),
                Ok(_) => {}
                Err(e) => warn!("{}", e),
            }
        }
        formats
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("不支持的输出格式: {}", s))
    }
}

/// stats.json 内容
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub update_time: String,
    pub total_nodes: usize,
    /// 协议按首次出现的顺序排列
    pub protocols: Map<String, JsonValue>,
}

impl Stats {
    pub fn from_nodes(nodes: &[Node], now: DateTime<Local>) -> Self {
        let mut protocols = Map::new();
        for node in nodes {
            let entry = protocols
                .entry(node.protocol.as_str().to_string())
                .or_insert(JsonValue::from(0u64));
            let count = entry.as_u64().unwrap_or(0);
            *entry = JsonValue::from(count + 1);
        }
        Self {
            update_time: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            total_nodes: nodes.len(),
            protocols,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct Formatter {
    clash_template: Mapping,
}

impl Formatter {
    pub fn new(clash_template: Mapping) -> Self {
        Self { clash_template }
    }

    /// 所有节点的分享链接按行拼接后整体 Base64 编码
    pub fn to_base64(&self, nodes: &[Node]) -> String {
        let links: Vec<String> = nodes.iter().map(codec::to_link).collect();
        info!("生成 Base64 格式，包含 {} 个节点", links.len());
        b64::encode_standard(&links.join("\n"))
    }

    pub fn to_clash_yaml(&self, nodes: &[Node]) -> anyhow::Result<String> {
        clash::render_document(nodes, &self.clash_template).context("生成 Clash 配置失败")
    }

    pub fn to_v2ray_json(&self, nodes: &[Node]) -> anyhow::Result<String> {
        v2ray::render_document(nodes).context("生成 V2Ray 配置失败")
    }

    pub fn to_surge(&self, nodes: &[Node]) -> String {
        surge::render_document(nodes)
    }

    pub fn to_quantumult(&self, nodes: &[Node]) -> String {
        quantumult::render_document(nodes)
    }

    pub fn render(&self, format: OutputFormat, nodes: &[Node]) -> anyhow::Result<String> {
        match format {
            OutputFormat::Base64 => Ok(self.to_base64(nodes)),
            OutputFormat::Clash => self.to_clash_yaml(nodes),
            OutputFormat::V2ray => self.to_v2ray_json(nodes),
            OutputFormat::Surge => Ok(self.to_surge(nodes)),
            OutputFormat::Quantumult => Ok(self.to_quantumult(nodes)),
        }
    }

    /// 生成并写出一种格式，返回写入的路径
    pub fn write(&self, format: OutputFormat, nodes: &[Node], dir: &Path) -> anyhow::Result<PathBuf> {
        let content = self.render(format, nodes)?;
        let path = dir.join(format.file_name());
        save_to_file(&content, &path)?;
        Ok(path)
    }
}

pub fn save_to_file<P: AsRef<Path>>(content: &str, path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("无法创建目录: {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("无法写入文件: {}", path.display()))?;
    info!("已保存到文件: {}", path.display());
    Ok(())
}

/// 创建 `<base>/<timestamp>/`，并把 `<base>/latest` 指向它
pub fn prepare_output_dir(base: &Path, timestamp: &str) -> anyhow::Result<PathBuf> {
    let dir = base.join(timestamp);
    fs::create_dir_all(&dir).with_context(|| format!("无法创建输出目录: {}", dir.display()))?;
    update_latest_link(base, timestamp)?;
    Ok(dir)
}

#[cfg(unix)]
fn update_latest_link(base: &Path, timestamp: &str) -> anyhow::Result<()> {
    let link = base.join(LATEST_LINK);
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link).with_context(|| format!("无法删除旧链接: {}", link.display()))?;
    }
    std::os::unix::fs::symlink(timestamp, &link)
        .with_context(|| format!("无法创建链接: {}", link.display()))?;
    info!("最新链接: {} -> {}", link.display(), timestamp);
    Ok(())
}

#[cfg(not(unix))]
fn update_latest_link(_base: &Path, _timestamp: &str) -> anyhow::Result<()> {
    Ok(())
}
