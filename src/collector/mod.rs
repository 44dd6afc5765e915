//! 从订阅、GitHub 等来源并发收集节点

pub mod fetcher;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::codec::{self, ParseReport, b64, clash};
use crate::config::{GithubSource, Sources, SubscriptionSource, TelegramSource};
use crate::proxy::{Node, validator};
pub use fetcher::{Fetcher, HttpFetcher};

const GITHUB_BRANCHES: [&str; 2] = ["main", "master"];

pub fn github_raw_url(repo: &str, branch: &str, file: &str) -> String {
    format!("https://raw.githubusercontent.com/{}/{}/{}", repo, branch, file)
}

/// Base64 订阅：整体解码失败时按明文处理，逐行解析
pub fn decode_base64_payload(content: &str) -> ParseReport {
    let decoded = b64::decode(content).unwrap_or_else(|_| content.to_string());
    let links = decoded.lines().map(str::trim).filter(|l| !l.is_empty());
    codec::parse_batch_report(links)
}

/// Clash 订阅：读取 proxies 列表，不支持的类型直接跳过
pub fn decode_clash_payload(content: &str) -> Vec<Node> {
    match clash::parse_document(content) {
        Ok((nodes, skipped)) => {
            if !skipped.is_empty() {
                debug!("Clash 订阅中跳过 {} 个代理", skipped.len());
            }
            nodes
        }
        Err(e) => {
            warn!("解析 Clash 订阅失败: {}", e);
            Vec::new()
        }
    }
}

pub struct Collector<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> Collector<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// 依次收集订阅源、GitHub 源、Telegram 源，结果按源的配置顺序拼接
    pub async fn collect_all(&self, sources: &Sources) -> Vec<Node> {
        info!("开始收集节点...");
        let mut all_nodes = Vec::new();

        if !sources.subscription_sources.is_empty() {
            info!("收集订阅源: {} 个", sources.subscription_sources.len());
            all_nodes.extend(self.collect_subscriptions(&sources.subscription_sources).await);
        }
        if !sources.github_sources.is_empty() {
            info!("收集 GitHub 源: {} 个", sources.github_sources.len());
            all_nodes.extend(self.collect_github_sources(&sources.github_sources).await);
        }
        if !sources.telegram_sources.is_empty() {
            info!("收集 Telegram 源: {} 个", sources.telegram_sources.len());
            all_nodes.extend(self.collect_telegram_sources(&sources.telegram_sources).await);
        }

        info!("节点收集完成，共收集 {} 个节点", all_nodes.len());
        all_nodes
    }

    pub async fn collect_subscriptions(&self, sources: &[SubscriptionSource]) -> Vec<Node> {
        let results = join_all(sources.iter().map(|s| self.fetch_subscription(s))).await;
        results.into_iter().flatten().collect()
    }

    async fn fetch_subscription(&self, source: &SubscriptionSource) -> Vec<Node> {
        if !validator::validate_url(&source.url) {
            warn!("订阅源 {} 的 URL 无效: {}", source.name, source.url);
            return Vec::new();
        }

        info!("正在获取订阅源: {}", source.name);
        let Some(content) = self.fetcher.fetch(&source.url).await else {
            warn!("订阅源 {} 内容为空", source.name);
            return Vec::new();
        };

        let nodes = match source.kind.as_str() {
            "base64" => {
                let report = decode_base64_payload(&content);
                if !report.skipped.is_empty() {
                    debug!("订阅源 {} 跳过 {} 条链接", source.name, report.skipped.len());
                }
                report.nodes
            }
            "clash" => decode_clash_payload(&content),
            other => {
                warn!("不支持的订阅类型: {}", other);
                Vec::new()
            }
        };

        info!("订阅源 {} 获取到 {} 个节点", source.name, nodes.len());
        nodes
    }

    pub async fn collect_github_sources(&self, sources: &[GithubSource]) -> Vec<Node> {
        let results = join_all(sources.iter().map(|s| self.fetch_github_source(s))).await;
        results.into_iter().flatten().collect()
    }

    async fn fetch_github_source(&self, source: &GithubSource) -> Vec<Node> {
        if source.repo.trim().is_empty() || source.file.trim().is_empty() {
            warn!("GitHub 源 {} 配置不完整", source.name);
            return Vec::new();
        }

        info!("正在获取 GitHub 源: {}", source.name);
        let mut content = None;
        for branch in GITHUB_BRANCHES {
            let url = github_raw_url(&source.repo, branch, &source.file);
            content = self.fetcher.fetch(&url).await;
            if content.is_some() {
                break;
            }
        }
        let Some(content) = content else {
            warn!("GitHub 源 {} 内容为空", source.name);
            return Vec::new();
        };

        let nodes = decode_base64_payload(&content).nodes;
        info!("GitHub 源 {} 获取到 {} 个节点", source.name, nodes.len());
        nodes
    }

    /// 需要 Telegram API，暂不支持
    pub async fn collect_telegram_sources(&self, _sources: &[TelegramSource]) -> Vec<Node> {
        info!("Telegram 源收集功能暂未实现（需要配置 Telegram API）");
        Vec::new()
    }
}
