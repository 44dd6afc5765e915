//! V2Ray outbound 与配置文档

use serde_json::{Value as JsonValue, json};

use crate::proxy::{Node, Protocol, Transport};

fn stream_settings(t: &Transport) -> JsonValue {
    let mut settings = json!({ "network": t.network });
    if t.is_ws() {
        settings["wsSettings"] = json!({
            "path": if t.path.is_empty() { "/" } else { t.path.as_str() },
            "headers": { "Host": t.host },
        });
    } else if t.is_grpc() {
        settings["grpcSettings"] = json!({ "serviceName": t.path });
    }
    if t.tls {
        settings["security"] = json!("tls");
        settings["tlsSettings"] = json!({
            "serverName": t.sni,
            "allowInsecure": t.allow_insecure,
        });
    }
    settings
}

/// 节点转换为 outbound；SSR 没有对应的 outbound 类型，返回 `None`
pub fn to_outbound(node: &Node) -> Option<JsonValue> {
    let outbound = match node.protocol {
        Protocol::Ss => json!({
            "tag": node.name,
            "protocol": "shadowsocks",
            "settings": {
                "servers": [{
                    "address": node.server,
                    "port": node.port,
                    "method": node.method,
                    "password": node.password,
                }]
            }
        }),
        Protocol::Vmess => json!({
            "tag": node.name,
            "protocol": "vmess",
            "settings": {
                "vnext": [{
                    "address": node.server,
                    "port": node.port,
                    "users": [{
                        "id": node.password,
                        "alterId": node.alter_id(),
                        "security": if node.method.is_empty() { "auto" } else { node.method.as_str() },
                    }]
                }]
            },
            "streamSettings": stream_settings(&node.transport()),
        }),
        Protocol::Trojan => json!({
            "tag": node.name,
            "protocol": "trojan",
            "settings": {
                "servers": [{
                    "address": node.server,
                    "port": node.port,
                    "password": node.password,
                }]
            },
            "streamSettings": stream_settings(&node.transport()),
        }),
        Protocol::Vless => json!({
            "tag": node.name,
            "protocol": "vless",
            "settings": {
                "vnext": [{
                    "address": node.server,
                    "port": node.port,
                    "users": [{
                        "id": node.password,
                        "encryption": if node.method.is_empty() { "none" } else { node.method.as_str() },
                        "flow": node.extra.text("flow"),
                    }]
                }]
            },
            "streamSettings": stream_settings(&node.transport()),
        }),
        Protocol::Ssr => {
            log::debug!("V2Ray 不支持的协议: {}", node.protocol);
            return None;
        }
    };
    Some(outbound)
}

/// 生成 V2Ray 客户端配置，2 空格缩进
pub fn render_document(nodes: &[Node]) -> Result<String, serde_json::Error> {
    let outbounds: Vec<JsonValue> = nodes.iter().filter_map(to_outbound).collect();
    let count = outbounds.len();

    let config = json!({
        "log": { "loglevel": "warning" },
        "inbounds": [
            {
                "port": 1080,
                "protocol": "socks",
                "settings": { "auth": "noauth", "udp": true }
            },
            { "port": 1081, "protocol": "http" }
        ],
        "outbounds": outbounds,
        "routing": {
            "domainStrategy": "IPOnDemand",
            "rules": [
                { "type": "field", "ip": ["geoip:private"], "outboundTag": "direct" },
                { "type": "field", "ip": ["geoip:cn"], "outboundTag": "direct" }
            ]
        }
    });

    log::info!("生成 V2Ray JSON 配置，包含 {} 个节点", count);
    serde_json::to_string_pretty(&config)
}
