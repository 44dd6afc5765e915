use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "settings.yaml";
pub const SOURCES_FILE: &str = "sources.yaml";
pub const CLASH_TEMPLATE_FILE: &str = "clash_template.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// 抓取超时（秒）
    pub timeout: u64,
    pub user_agent: String,
    /// 抓取尝试次数
    pub retry: u32,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            timeout: 10,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            retry: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub method: String,
    pub keep_faster: bool,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            method: "hash".to_string(),
            keep_faster: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub exclude_keywords: Vec<String>,
    pub include_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedTestSettings {
    pub enabled: bool,
    /// 单个节点探测超时（秒）
    pub timeout: u64,
    pub min_speed: f64,
    /// 最大允许延迟（毫秒）
    pub max_latency: f64,
    pub concurrent_tests: usize,
    // 仅保留配置项，TCP 探测不使用
    pub test_url: String,
    pub filter_invalid: bool,
    pub progress: bool,
}

impl Default for SpeedTestSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: 15,
            min_speed: 1.0,
            max_latency: 1000.0,
            concurrent_tests: 50,
            test_url: "http://www.gstatic.com/generate_204".to_string(),
            filter_invalid: true,
            progress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub sort_by: String,
    pub max_nodes: usize,
    pub max_per_protocol: Option<usize>,
    pub formats: Vec<String>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            sort_by: "speed".to_string(),
            max_nodes: 200,
            max_per_protocol: None,
            formats: vec!["base64".to_string(), "clash".to_string()],
        }
    }
}

/// settings.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub deduplication: DedupSettings,
    pub filter: FilterSettings,
    pub speed_test: SpeedTestSettings,
    pub output: OutputSettings,
}

fn default_enabled() -> bool {
    true
}

fn default_source_type() -> String {
    "base64".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSource {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default = "default_source_type")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSource {
    pub name: String,
    pub repo: String,
    pub file: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSource {
    pub name: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// sources.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sources {
    pub subscription_sources: Vec<SubscriptionSource>,
    pub github_sources: Vec<GithubSource>,
    pub telegram_sources: Vec<TelegramSource>,
}

impl Sources {
    /// 去掉未启用的源
    pub fn enabled(&self) -> Sources {
        Sources {
            subscription_sources: self
                .subscription_sources
                .iter()
                .filter(|s| s.enabled)
                .cloned()
                .collect(),
            github_sources: self.github_sources.iter().filter(|s| s.enabled).cloned().collect(),
            telegram_sources: self
                .telegram_sources
                .iter()
                .filter(|s| s.enabled)
                .cloned()
                .collect(),
        }
    }

    /// 只保留指定名称的源（不区分种类）
    pub fn only(&self, name: &str) -> Sources {
        Sources {
            subscription_sources: self
                .subscription_sources
                .iter()
                .filter(|s| s.name == name)
                .cloned()
                .collect(),
            github_sources: self.github_sources.iter().filter(|s| s.name == name).cloned().collect(),
            telegram_sources: self
                .telegram_sources
                .iter()
                .filter(|s| s.name == name)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.subscription_sources.len() + self.github_sources.len() + self.telegram_sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 配置目录中的三份配置，启动时加载一次，之后只读
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub config_dir: PathBuf,
    pub settings: Settings,
    pub sources: Sources,
    clash_template: Option<Mapping>,
}

impl ConfigManager {
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Self {
        let config_dir = config_dir.as_ref().to_path_buf();
        let settings = load_or_default(&config_dir.join(SETTINGS_FILE), "系统配置");
        let sources = load_or_default(&config_dir.join(SOURCES_FILE), "节点源配置");
        let clash_template: Option<Mapping> =
            load_yaml(&config_dir.join(CLASH_TEMPLATE_FILE), "Clash 模板");

        Self {
            config_dir,
            settings,
            sources,
            clash_template,
        }
    }

    /// 已启用的节点源
    pub fn enabled_sources(&self) -> Sources {
        self.sources.enabled()
    }

    /// 配置的 Clash 模板，没有时使用内置默认模板
    pub fn clash_template(&self) -> Mapping {
        self.clash_template
            .clone()
            .unwrap_or_else(crate::codec::clash::default_template)
    }

    /// 在配置目录中写出默认的 settings.yaml / sources.yaml（已存在的文件不覆盖）
    pub fn write_defaults<P: AsRef<Path>>(config_dir: P) -> anyhow::Result<Vec<PathBuf>> {
        let dir = config_dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let settings_path = dir.join(SETTINGS_FILE);
        if !settings_path.exists() {
            save_to_file(&Settings::default(), &settings_path)?;
            written.push(settings_path);
        }
        let sources_path = dir.join(SOURCES_FILE);
        if !sources_path.exists() {
            save_to_file(&Sources::default(), &sources_path)?;
            written.push(sources_path);
        }
        Ok(written)
    }
}

pub fn load_from_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> anyhow::Result<T> {
    let content = fs::read_to_string(path)?;
    let value: T = serde_yaml::from_str(&content)?;
    Ok(value)
}

pub fn save_to_file<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> anyhow::Result<()> {
    let content = serde_yaml::to_string(value)?;
    fs::write(path, content)?;
    Ok(())
}

/// 文件不存在或无法解析时返回 `None` 并打印警告
fn load_yaml<T: DeserializeOwned>(path: &Path, label: &str) -> Option<T> {
    if !path.exists() {
        warn!("{}文件不存在: {}", label, path.display());
        return None;
    }
    match load_from_file(path) {
        Ok(value) => {
            info!("已加载{}: {}", label, path.display());
            Some(value)
        }
        Err(e) => {
            warn!("{}加载失败，使用默认值: {} ({})", label, path.display(), e);
            None
        }
    }
}

fn load_or_default<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    load_yaml(path, label).unwrap_or_default()
}
