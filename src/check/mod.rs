//! TCP 连接延迟探测
//!
//! 这里只测到节点服务器的 TCP 建连时间，不经过代理隧道；
//! `speed` 是按延迟分档得到的相对分值，不是实际吞吐量。

use log::{debug, info, warn};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task;

use crate::config::SpeedTestSettings;
use crate::dedup::{Deduplicator, SpeedMap, fingerprint};
use crate::proxy::Node;
use crate::ui::ProgressTracker;

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub node: Node,
    pub available: bool,
    /// 毫秒
    pub latency_ms: f64,
    pub speed: f64,
    pub error: Option<String>,
}

impl TestResult {
    fn available(node: Node, latency_ms: f64) -> Self {
        Self {
            node,
            available: true,
            latency_ms,
            speed: estimate_speed(latency_ms),
            error: None,
        }
    }

    fn unavailable(node: Node, error: impl Into<String>) -> Self {
        Self {
            node,
            available: false,
            latency_ms: 0.0,
            speed: 0.0,
            error: Some(error.into()),
        }
    }
}

/// 延迟分档：<50ms→10，<100→8，<200→5，<300→3，<500→2，其余→1
pub fn estimate_speed(latency_ms: f64) -> f64 {
    match latency_ms {
        l if l < 50.0 => 10.0,
        l if l < 100.0 => 8.0,
        l if l < 200.0 => 5.0,
        l if l < 300.0 => 3.0,
        l if l < 500.0 => 2.0,
        _ => 1.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Speed,
    Latency,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speed" => Ok(SortKey::Speed),
            "latency" => Ok(SortKey::Latency),
            other => Err(other.to_string()),
        }
    }
}

impl SortKey {
    /// 未知的排序方式回退为 speed
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_else(|unknown| {
            warn!("未知的排序方式: {}，使用默认方式（speed）", unknown);
            SortKey::Speed
        })
    }
}

pub struct Stats {
    pub total_nodes: AtomicU64,
    pub available_nodes: AtomicU64,
    pub failed_nodes: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_nodes: AtomicU64::new(0),
            available_nodes: AtomicU64::new(0),
            failed_nodes: AtomicU64::new(0),
        }
    }

    fn record(&self, available: bool) {
        if available {
            self.available_nodes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_nodes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_success_rate(&self) -> f64 {
        let total = self.total_nodes.load(Ordering::Relaxed);
        let available = self.available_nodes.load(Ordering::Relaxed);
        if total > 0 {
            (available as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LatencyProber {
    timeout: Duration,
    concurrent: usize,
    min_speed: f64,
    max_latency: f64,
    stats: Arc<Stats>,
    progress: Option<ProgressTracker>,
}

impl LatencyProber {
    pub fn new(settings: &SpeedTestSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout),
            concurrent: settings.concurrent_tests.max(1),
            min_speed: settings.min_speed,
            max_latency: settings.max_latency,
            stats: Arc::new(Stats::new()),
            progress: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn get_stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// 探测单个节点；失败和超时都转成不可用结果
    pub async fn probe(&self, node: Node) -> TestResult {
        probe_node(node, self.timeout).await
    }

    /// 按并发上限分批探测，批与批顺序执行，结果顺序与输入一致
    pub async fn probe_all(&self, nodes: Vec<Node>) -> Vec<TestResult> {
        let total = nodes.len();
        info!("开始测试 {} 个节点的延迟...", total);
        self.stats.total_nodes.store(total as u64, Ordering::Relaxed);
        if let Some(progress) = &self.progress {
            progress.set_total_nodes(total as u64);
        }

        let mut results = Vec::with_capacity(total);
        let mut pending = nodes.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<Node> = pending.by_ref().take(self.concurrent).collect();
            results.extend(self.probe_batch(batch).await);
            debug!("已测试 {}/{} 个节点", results.len(), total);
        }

        if let Some(progress) = &self.progress {
            progress.finalize();
        }
        let available = results.iter().filter(|r| r.available).count();
        info!("测速完成，可用节点: {}/{}", available, total);
        results
    }

    async fn probe_batch(&self, batch: Vec<Node>) -> Vec<TestResult> {
        let mut tasks = Vec::with_capacity(batch.len());
        for node in batch {
            let timeout = self.timeout;
            let fallback = node.clone();
            let handle = task::spawn(async move { probe_node(node, timeout).await });
            tasks.push((fallback, handle));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (fallback, handle) in tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    debug!("节点测试异常: {}, 错误: {}", fallback.name, e);
                    TestResult::unavailable(fallback, format!("task failed: {}", e))
                }
            };
            self.stats.record(result.available);
            if let Some(progress) = &self.progress {
                progress.record(result.available);
            }
            results.push(result);
        }
        results
    }

    /// 可选丢弃不可用结果，再丢弃低于最低速度或高于最大延迟的结果
    pub fn filter(&self, results: Vec<TestResult>, drop_unavailable: bool) -> Vec<TestResult> {
        let before = results.len();
        let filtered: Vec<TestResult> = results
            .into_iter()
            .filter(|r| !drop_unavailable || r.available)
            .filter(|r| r.speed >= self.min_speed)
            .filter(|r| r.latency_ms <= self.max_latency)
            .collect();
        info!("过滤后剩余 {}/{} 个节点", filtered.len(), before);
        filtered
    }
}

async fn probe_node(node: Node, timeout: Duration) -> TestResult {
    let addr = (node.server.clone(), node.port);
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            drop(stream);
            TestResult::available(node, latency_ms)
        }
        Ok(Err(e)) => {
            debug!("延迟测试失败 {}, 错误: {}", node.address(), e);
            TestResult::unavailable(node, e.to_string())
        }
        Err(_) => {
            debug!("延迟测试超时 {}", node.address());
            TestResult::unavailable(node, "连接超时")
        }
    }
}

/// 稳定排序；不可用结果始终排在最后
pub fn sort_results(mut results: Vec<TestResult>, key: SortKey) -> Vec<TestResult> {
    match key {
        SortKey::Speed => {
            let score = |r: &TestResult| if r.available { r.speed } else { -1.0 };
            results.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(CmpOrdering::Equal));
        }
        SortKey::Latency => {
            let score = |r: &TestResult| {
                if r.available { r.latency_ms } else { f64::INFINITY }
            };
            results.sort_by(|a, b| score(a).partial_cmp(&score(b)).unwrap_or(CmpOrdering::Equal));
        }
    }
    results
}

/// 去重使用的速度表，键为节点指纹
pub fn speed_map(results: &[TestResult]) -> SpeedMap {
    results
        .iter()
        .filter(|r| r.available)
        .map(|r| (fingerprint(&r.node), r.speed))
        .collect()
}

/// 对探测结果去重，保留的节点沿用各自的探测结果
pub fn remove_duplicate_results(dedup: &Deduplicator, results: Vec<TestResult>) -> Vec<TestResult> {
    let speeds = speed_map(&results);
    let nodes: Vec<Node> = results.iter().map(|r| r.node.clone()).collect();
    let mut by_fingerprint: HashMap<String, TestResult> = HashMap::with_capacity(results.len());
    for result in results {
        by_fingerprint.entry(fingerprint(&result.node)).or_insert(result);
    }

    dedup
        .remove_duplicates(nodes, Some(&speeds))
        .into_iter()
        .filter_map(|node| {
            by_fingerprint.remove(&fingerprint(&node)).map(|mut result| {
                result.node = node;
                result
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Protocol;
    use tokio::net::TcpListener;

    fn node(server: &str, port: u16) -> Node {
        Node::new(Protocol::Ss, server, port)
            .with_method("aes-256-gcm")
            .with_password("p")
    }

    fn result(name: &str, available: bool, latency_ms: f64) -> TestResult {
        let n = node("1.1.1.1", 1).with_name(name);
        if available {
            TestResult::available(n, latency_ms)
        } else {
            TestResult::unavailable(n, "x")
        }
    }

    /// 拿到一个当前没有监听的本地端口
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_estimate_speed_steps() {
        assert_eq!(estimate_speed(0.5), 10.0);
        assert_eq!(estimate_speed(50.0), 8.0);
        assert_eq!(estimate_speed(199.9), 5.0);
        assert_eq!(estimate_speed(250.0), 3.0);
        assert_eq!(estimate_speed(499.0), 2.0);
        assert_eq!(estimate_speed(500.0), 1.0);
    }

    #[tokio::test]
    async fn test_probe_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port();

        let prober = LatencyProber::new(&SpeedTestSettings::default())
            .with_timeout(Duration::from_secs(2));
        let ok = prober.probe(node("127.0.0.1", open)).await;
        assert!(ok.available);
        assert!(ok.latency_ms >= 0.0);
        assert!(ok.speed >= 1.0);
        assert!(ok.error.is_none());

        let bad = prober.probe(node("127.0.0.1", closed)).await;
        assert!(!bad.available);
        assert_eq!(bad.latency_ms, 0.0);
        assert!(bad.error.is_some());
    }

    #[tokio::test]
    async fn test_probe_all_keeps_order_across_batches() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port();

        let settings = SpeedTestSettings {
            concurrent_tests: 2,
            timeout: 2,
            ..Default::default()
        };
        let progress = ProgressTracker::new(false);
        let prober = LatencyProber::new(&settings).with_progress(progress.clone());

        let nodes = vec![
            node("127.0.0.1", open).with_name("n0"),
            node("127.0.0.1", closed).with_name("n1"),
            node("127.0.0.1", open).with_name("n2"),
            node("127.0.0.1", closed).with_name("n3"),
            node("127.0.0.1", open).with_name("n4"),
        ];
        let results = prober.probe_all(nodes).await;

        let names: Vec<&str> = results.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(names, vec!["n0", "n1", "n2", "n3", "n4"]);
        let available: Vec<bool> = results.iter().map(|r| r.available).collect();
        assert_eq!(available, vec![true, false, true, false, true]);

        let stats = prober.get_stats();
        assert_eq!(stats.available_nodes.load(Ordering::Relaxed), 3);
        assert_eq!(stats.failed_nodes.load(Ordering::Relaxed), 2);
        assert_eq!(progress.get_stats().checked, 5);
    }

    #[test]
    fn test_filter() {
        let settings = SpeedTestSettings {
            min_speed: 3.0,
            max_latency: 400.0,
            ..Default::default()
        };
        let prober = LatencyProber::new(&settings);
        let results = vec![
            result("fast", true, 20.0),
            result("slow", true, 450.0),
            result("mid", true, 250.0),
            result("down", false, 0.0),
        ];

        let kept = prober.filter(results.clone(), true);
        let names: Vec<&str> = kept.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "mid"]);

        // 不可用结果的速度为 0，仍会被最低速度过滤掉
        let kept = prober.filter(results.clone(), false);
        assert_eq!(kept.len(), 2);

        let lenient = LatencyProber::new(&SpeedTestSettings {
            min_speed: 0.0,
            max_latency: 400.0,
            ..Default::default()
        });
        let kept = lenient.filter(results, false);
        let names: Vec<&str> = kept.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "mid", "down"]);
    }

    #[test]
    fn test_sort_puts_unavailable_last() {
        let results = vec![
            result("down1", false, 0.0),
            result("b", true, 150.0),
            result("a", true, 20.0),
            result("down2", false, 0.0),
            result("c", true, 160.0),
        ];

        let by_speed = sort_results(results.clone(), SortKey::Speed);
        let names: Vec<&str> = by_speed.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "down1", "down2"]);

        let by_latency = sort_results(results, SortKey::Latency);
        let names: Vec<&str> = by_latency.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "down1", "down2"]);
    }

    #[test]
    fn test_sort_key_fallback() {
        assert_eq!(SortKey::parse_or_default("LATENCY"), SortKey::Latency);
        assert_eq!(SortKey::parse_or_default("random"), SortKey::Speed);
    }

    #[test]
    fn test_speed_map_uses_fingerprint() {
        let results = vec![result("a", true, 20.0), result("b", false, 0.0)];
        let map = speed_map(&results);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&fingerprint(&results[0].node)), Some(&10.0));
    }

    #[test]
    fn test_dedup_results_keeps_faster_node() {
        let slow = TestResult::available(node("1.1.1.1", 443).with_password("a"), 400.0);
        let fast = TestResult::available(node("1.1.1.1", 443).with_password("b"), 20.0);
        let other = TestResult::unavailable(node("2.2.2.2", 443), "x");

        let dedup = Deduplicator::new(crate::dedup::DedupMethod::Address, true);
        let kept = remove_duplicate_results(&dedup, vec![slow, fast, other]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].node.password, "b");
        assert_eq!(kept[0].speed, 10.0);
        assert!(!kept[1].available);

        let first_wins = Deduplicator::new(crate::dedup::DedupMethod::Address, false);
        let slow = TestResult::available(node("1.1.1.1", 443).with_password("a"), 400.0);
        let fast = TestResult::available(node("1.1.1.1", 443).with_password("b"), 20.0);
        let kept = remove_duplicate_results(&first_wins, vec![slow, fast]);
        assert_eq!(kept[0].node.password, "a");
        assert_eq!(kept[0].speed, 2.0);
    }
}
