//! Surge 配置行与文档

use crate::proxy::{Node, Protocol};

pub const POLICY_GROUP: &str = "Proxy";

/// 节点转换为 `[Proxy]` 段中的一行；SSR / VLESS 不支持
pub fn to_line(node: &Node) -> Option<String> {
    let mut parts = vec![format!("{} = {}", node.name, node.protocol)];
    parts.push(node.server.clone());
    parts.push(node.port.to_string());

    match node.protocol {
        Protocol::Ss => {
            parts.push(format!("encrypt-method={}", node.method));
            parts.push(format!("password={}", node.password));
        }
        Protocol::Vmess => {
            let t = node.transport();
            parts.push(format!("username={}", node.password));
            if t.tls {
                parts.push("tls=true".to_string());
                if !t.sni.is_empty() {
                    parts.push(format!("sni={}", t.sni));
                }
            }
            if t.is_ws() {
                parts.push("ws=true".to_string());
                if !t.path.is_empty() {
                    parts.push(format!("ws-path={}", t.path));
                }
                if !t.host.is_empty() {
                    parts.push(format!("ws-headers=Host:{}", t.host));
                }
            }
        }
        Protocol::Trojan => {
            let t = node.transport();
            parts.push(format!("password={}", node.password));
            if !t.sni.is_empty() {
                parts.push(format!("sni={}", t.sni));
            }
            if t.allow_insecure {
                parts.push("skip-cert-verify=true".to_string());
            }
        }
        Protocol::Ssr | Protocol::Vless => {
            log::debug!("Surge 不支持的协议: {}", node.protocol);
            return None;
        }
    }
    Some(parts.join(", "))
}

/// `Proxy` 组只列出生成了行的节点，SSR/VLESS 的名称有意不写入，没有节点时回退为 `DIRECT`
pub fn render_document(nodes: &[Node]) -> String {
    let mut lines = vec![
        "#!MANAGED-CONFIG".to_string(),
        String::new(),
        "[General]".to_string(),
        "loglevel = notify".to_string(),
        "skip-proxy = 127.0.0.1, 192.168.0.0/16, 10.0.0.0/8, 172.16.0.0/12, localhost, *.local"
            .to_string(),
        String::new(),
        "[Proxy]".to_string(),
    ];

    let mut names = Vec::new();
    for node in nodes {
        if let Some(line) = to_line(node) {
            lines.push(line);
            names.push(node.name.as_str());
        }
    }
    if names.is_empty() {
        names.push("DIRECT");
    }

    lines.extend([
        String::new(),
        "[Proxy Group]".to_string(),
        format!("{} = select, {}", POLICY_GROUP, names.join(", ")),
        String::new(),
        "[Rule]".to_string(),
        "GEOIP,CN,DIRECT".to_string(),
        format!("FINAL,{}", POLICY_GROUP),
    ]);

    log::info!("生成 Surge 配置，包含 {} 个节点", nodes.len());
    lines.join("\n")
}
