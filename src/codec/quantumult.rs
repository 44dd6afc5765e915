//! Quantumult X 配置行与文档

use crate::proxy::{Node, Protocol};

pub const POLICY_GROUP: &str = "Proxy";

/// 节点转换为 `[server_local]` 段中的一行；SSR / VLESS 不支持
pub fn to_line(node: &Node) -> Option<String> {
    let address = format!("{}:{}", node.server, node.port);
    let mut parts = Vec::new();

    match node.protocol {
        Protocol::Ss => {
            parts.push(format!("shadowsocks={}", address));
            parts.push(format!("method={}", node.method));
            parts.push(format!("password={}", node.password));
        }
        Protocol::Vmess => {
            let t = node.transport();
            parts.push(format!("vmess={}", address));
            let method = if node.method.is_empty() {
                "aes-128-gcm"
            } else {
                node.method.as_str()
            };
            parts.push(format!("method={}", method));
            parts.push(format!("password={}", node.password));

            let obfs = match (t.is_ws(), t.tls) {
                (true, true) => Some("wss"),
                (true, false) => Some("ws"),
                (false, true) => Some("over-tls"),
                (false, false) => None,
            };
            if let Some(obfs) = obfs {
                parts.push(format!("obfs={}", obfs));
                let host = if t.host.is_empty() { &t.sni } else { &t.host };
                if !host.is_empty() {
                    parts.push(format!("obfs-host={}", host));
                }
                if t.is_ws() && !t.path.is_empty() {
                    parts.push(format!("obfs-uri={}", t.path));
                }
            }
        }
        Protocol::Trojan => {
            let t = node.transport();
            parts.push(format!("trojan={}", address));
            parts.push(format!("password={}", node.password));
            parts.push("over-tls=true".to_string());
            if !t.sni.is_empty() {
                parts.push(format!("tls-host={}", t.sni));
            }
            if t.allow_insecure {
                parts.push("tls-verification=false".to_string());
            }
        }
        Protocol::Ssr | Protocol::Vless => {
            log::debug!("Quantumult X 不支持的协议: {}", node.protocol);
            return None;
        }
    }

    parts.push(format!("tag={}", node.name));
    Some(parts.join(", "))
}

/// `Proxy` 组只列出生成了行的节点，SSR/VLESS 的名称有意不写入，没有节点时回退为 `direct`
pub fn render_document(nodes: &[Node]) -> String {
    let mut lines = vec![
        "[general]".to_string(),
        String::new(),
        "[server_local]".to_string(),
    ];

    let mut names = Vec::new();
    for node in nodes {
        if let Some(line) = to_line(node) {
            lines.push(line);
            names.push(node.name.as_str());
        }
    }
    if names.is_empty() {
        names.push("direct");
    }

    lines.extend([
        String::new(),
        "[policy]".to_string(),
        format!("static={}, {}", POLICY_GROUP, names.join(", ")),
        String::new(),
        "[filter_local]".to_string(),
        "geoip, cn, direct".to_string(),
        format!("final, {}", POLICY_GROUP),
    ]);

    log::info!("生成 Quantumult X 配置，包含 {} 个节点", nodes.len());
    lines.join("\n")
}
