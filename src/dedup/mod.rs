//! 节点去重、关键词过滤与按协议限量

use log::{info, warn};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::str::FromStr;

use crate::proxy::{Node, Protocol};

/// 测速结果查找表：节点指纹 -> 速度
pub type SpeedMap = HashMap<String, f64>;

/// 节点配置指纹（md5 十六进制）
///
/// 由 `protocol|server|port|password|method` 加上按键排序、值非空的附加参数
/// `key=value` 组成，附加参数的插入顺序不影响结果。
pub fn fingerprint(node: &Node) -> String {
    let mut components = vec![
        node.protocol.as_str().to_string(),
        node.server.clone(),
        node.port.to_string(),
        node.password.clone(),
        node.method.clone(),
    ];
    for (key, value) in node.extra.iter() {
        if value.is_truthy() {
            components.push(format!("{}={}", key, value));
        }
    }

    format!("{:x}", Md5::digest(components.join("|").as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupMethod {
    #[default]
    Hash,
    Address,
    Both,
}

impl FromStr for DedupMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(DedupMethod::Hash),
            "address" => Ok(DedupMethod::Address),
            "both" => Ok(DedupMethod::Both),
            other => Err(other.to_string()),
        }
    }
}

impl DedupMethod {
    /// 未知的去重方式回退为 hash
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_else(|unknown| {
            warn!("未知的去重方式: {}，使用默认方式（hash）", unknown);
            DedupMethod::Hash
        })
    }
}

pub struct Deduplicator {
    method: DedupMethod,
    keep_faster: bool,
}

impl Deduplicator {
    pub fn new(method: DedupMethod, keep_faster: bool) -> Self {
        Self { method, keep_faster }
    }

    pub fn keep_faster(&self) -> bool {
        self.keep_faster
    }

    /// 去除重复节点
    ///
    /// 同一个键首次出现的节点胜出并保持原位置；只有开启 `keep_faster` 且给出速度表时，
    /// 速度严格更快的后来者才会替换它（仍在原位置）。
    pub fn remove_duplicates(&self, nodes: Vec<Node>, speeds: Option<&SpeedMap>) -> Vec<Node> {
        if nodes.is_empty() {
            return nodes;
        }
        let before = nodes.len();
        info!("开始去重，原始节点数: {}", before);

        let unique = match self.method {
            DedupMethod::Hash => self.dedup_by(nodes, speeds, fingerprint),
            DedupMethod::Address => self.dedup_by(nodes, speeds, Node::address),
            DedupMethod::Both => {
                let by_hash = self.dedup_by(nodes, speeds, fingerprint);
                self.dedup_by(by_hash, speeds, Node::address)
            }
        };

        info!(
            "去重完成，移除 {} 个重复节点，剩余 {} 个节点",
            before - unique.len(),
            unique.len()
        );
        unique
    }

    /// 按给定键去重；`kept` 保存输出顺序，`index` 记录键在 `kept` 中的位置
    fn dedup_by<K>(&self, nodes: Vec<Node>, speeds: Option<&SpeedMap>, key_of: K) -> Vec<Node>
    where
        K: Fn(&Node) -> String,
    {
        let speeds = speeds.filter(|s| self.keep_faster && !s.is_empty());
        let speed_of = |node: &Node| -> f64 {
            speeds
                .and_then(|s| s.get(&fingerprint(node)).copied())
                .unwrap_or(0.0)
        };

        let mut kept: Vec<Node> = Vec::with_capacity(nodes.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for node in nodes {
            let key = key_of(&node);
            match index.get(&key) {
                None => {
                    index.insert(key, kept.len());
                    kept.push(node);
                }
                Some(&pos) => {
                    if speeds.is_some() && speed_of(&node) > speed_of(&kept[pos]) {
                        kept[pos] = node;
                    }
                }
            }
        }
        kept
    }

    /// 关键词过滤，对 `"{name} {server}"` 做不区分大小写的子串匹配
    ///
    /// 先按排除词丢弃，再要求至少命中一个包含词（包含词为空时不限制）。
    pub fn filter_by_keywords(
        &self,
        nodes: Vec<Node>,
        exclude: &[String],
        include: &[String],
    ) -> Vec<Node> {
        let exclude: Vec<String> = exclude.iter().map(|k| k.to_lowercase()).collect();
        let include: Vec<String> = include.iter().map(|k| k.to_lowercase()).collect();
        let before = nodes.len();

        let filtered: Vec<Node> = nodes
            .into_iter()
            .filter(|node| {
                let text = format!("{} {}", node.name, node.server).to_lowercase();
                if exclude.iter().any(|k| text.contains(k.as_str())) {
                    return false;
                }
                include.is_empty() || include.iter().any(|k| text.contains(k.as_str()))
            })
            .collect();

        info!("关键词过滤: {} -> {} 个节点", before, filtered.len());
        filtered
    }

    /// 按协议分组，组的顺序为协议首次出现的顺序
    pub fn group_by_protocol(&self, nodes: Vec<Node>) -> Vec<(Protocol, Vec<Node>)> {
        let mut groups: Vec<(Protocol, Vec<Node>)> = Vec::new();
        for node in nodes {
            match groups.iter().position(|(p, _)| *p == node.protocol) {
                Some(i) => groups[i].1.push(node),
                None => groups.push((node.protocol, vec![node])),
            }
        }
        groups
    }

    pub fn limit_nodes_per_protocol(&self, nodes: Vec<Node>, max_per_protocol: usize) -> Vec<Node> {
        let mut limited = Vec::new();
        for (protocol, mut list) in self.group_by_protocol(nodes) {
            if list.len() > max_per_protocol {
                info!(
                    "协议 {} 节点数 {} 超过限制 {}，进行裁剪",
                    protocol,
                    list.len(),
                    max_per_protocol
                );
                list.truncate(max_per_protocol);
            }
            limited.extend(list);
        }
        limited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Extras;

    fn ss(server: &str, port: u16, password: &str, name: &str) -> Node {
        Node::new(Protocol::Ss, server, port)
            .with_method("aes-256-gcm")
            .with_password(password)
            .with_name(name)
    }

    #[test]
    fn test_fingerprint_ignores_extra_order() {
        let a: Extras = [("net", "ws"), ("host", "a.com"), ("sni", "")].into_iter().collect();
        let b: Extras = [("sni", ""), ("host", "a.com"), ("net", "ws")].into_iter().collect();
        let base = Node::new(Protocol::Vmess, "a.com", 443).with_password("id");
        let fa = fingerprint(&base.clone().with_extras(a));
        let fb = fingerprint(&base.clone().with_extras(b));
        assert_eq!(fa, fb);
        assert_eq!(fa.len(), 32);

        // 空值不参与计算
        assert_eq!(
            fingerprint(&base.clone().with_extra("sni", "")),
            fingerprint(&base)
        );
        assert_ne!(
            fingerprint(&base.clone().with_extra("sni", "x")),
            fingerprint(&base)
        );
        assert_ne!(
            fingerprint(&base.clone().with_password("other")),
            fingerprint(&base)
        );
    }

    #[test]
    fn test_fingerprint_ignores_name() {
        assert_eq!(
            fingerprint(&ss("1.1.1.1", 1, "p", "a")),
            fingerprint(&ss("1.1.1.1", 1, "p", "b"))
        );
    }

    #[test]
    fn test_fingerprint_is_lowercase_md5_hex() {
        // md5("ss|1.1.1.1|1|p|aes-256-gcm")
        assert_eq!(
            fingerprint(&ss("1.1.1.1", 1, "p", "a")),
            "30e10e67d9f93d76c595d6d6092979b1"
        );
    }

    #[test]
    fn test_hash_dedup() {
        let nodes = vec![
            ss("1.1.1.1", 8388, "p", "first"),
            ss("1.1.1.1", 8388, "p", "second"),
            ss("2.2.2.2", 8388, "p", "third"),
        ];
        let dedup = Deduplicator::new(DedupMethod::Hash, true);
        let out = dedup.remove_duplicates(nodes, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "first");
    }

    #[test]
    fn test_address_dedup() {
        let nodes = vec![
            ss("1.1.1.1", 8388, "p1", "a"),
            ss("1.1.1.1", 8388, "p2", "b"),
        ];
        let by_hash = Deduplicator::new(DedupMethod::Hash, true);
        assert_eq!(by_hash.remove_duplicates(nodes.clone(), None).len(), 2);

        let by_address = Deduplicator::new(DedupMethod::Address, true);
        let out = by_address.remove_duplicates(nodes, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a");
    }

    #[test]
    fn test_keep_faster_replaces_in_place() {
        let nodes = vec![
            ss("1.1.1.1", 8388, "p1", "slow"),
            ss("9.9.9.9", 443, "x", "other"),
            ss("1.1.1.1", 8388, "p2", "fast"),
        ];
        let mut speeds = SpeedMap::new();
        speeds.insert(fingerprint(&nodes[0]), 2.0);
        speeds.insert(fingerprint(&nodes[2]), 10.0);

        let dedup = Deduplicator::new(DedupMethod::Address, true);
        let out = dedup.remove_duplicates(nodes.clone(), Some(&speeds));
        let names: Vec<&str> = out.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "other"]);

        let no_faster = Deduplicator::new(DedupMethod::Address, false);
        let out = no_faster.remove_duplicates(nodes, Some(&speeds));
        assert_eq!(out[0].name, "slow");
    }

    #[test]
    fn test_equal_speed_keeps_first() {
        let nodes = vec![ss("1.1.1.1", 1, "p", "a"), ss("1.1.1.1", 1, "p", "b")];
        let mut speeds = SpeedMap::new();
        speeds.insert(fingerprint(&nodes[0]), 5.0);
        let out = Deduplicator::new(DedupMethod::Hash, true).remove_duplicates(nodes, Some(&speeds));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a");
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let nodes = vec![
            ss("1.1.1.1", 1, "p", "a"),
            ss("1.1.1.1", 1, "q", "b"),
            ss("1.1.1.1", 1, "p", "c"),
            ss("2.2.2.2", 2, "p", "d"),
        ];
        for method in [DedupMethod::Hash, DedupMethod::Address, DedupMethod::Both] {
            let dedup = Deduplicator::new(method, true);
            let once = dedup.remove_duplicates(nodes.clone(), None);
            let twice = dedup.remove_duplicates(once.clone(), None);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_both_mode() {
        let nodes = vec![
            ss("1.1.1.1", 1, "p", "a"),
            ss("1.1.1.1", 1, "p", "a2"),
            ss("1.1.1.1", 1, "q", "b"),
        ];
        let out = Deduplicator::new(DedupMethod::Both, true).remove_duplicates(nodes, None);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_unknown_method_falls_back() {
        assert_eq!(DedupMethod::parse_or_default("Address"), DedupMethod::Address);
        assert_eq!(DedupMethod::parse_or_default("fuzzy"), DedupMethod::Hash);
    }

    #[test]
    fn test_filter_by_keywords() {
        let nodes = vec![
            ss("1.1.1.1", 1, "p", "香港 HK 01"),
            ss("2.2.2.2", 1, "p", "US 过期"),
            ss("hk2.example.com", 1, "p", "node"),
            ss("3.3.3.3", 1, "p", "JP"),
        ];
        let dedup = Deduplicator::new(DedupMethod::Hash, true);

        let out = dedup.filter_by_keywords(nodes.clone(), &["过期".to_string()], &[]);
        assert_eq!(out.len(), 3);

        let out = dedup.filter_by_keywords(nodes.clone(), &[], &["hk".to_string()]);
        let names: Vec<&str> = out.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["香港 HK 01", "node"]);

        let out = dedup.filter_by_keywords(nodes, &["01".to_string()], &["HK".to_string()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].server, "hk2.example.com");
    }

    #[test]
    fn test_limit_nodes_per_protocol() {
        let mut nodes: Vec<Node> = (1..=5)
            .map(|i| ss(&format!("10.0.0.{}", i), 1, "p", &format!("ss{}", i)))
            .collect();
        nodes.insert(2, Node::new(Protocol::Vmess, "v.example.com", 443).with_password("id"));

        let dedup = Deduplicator::new(DedupMethod::Hash, true);
        let out = dedup.limit_nodes_per_protocol(nodes, 3);
        let names: Vec<&str> = out.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["ss1", "ss2", "ss3", "VMess节点"]);
    }
}
