//! [`Node`] 到分享链接的编码

use serde::Serialize;
use url::form_urlencoded;

use super::b64;
use crate::proxy::{Node, Protocol};

pub fn to_link(node: &Node) -> String {
    match node.protocol {
        Protocol::Ss => encode_ss(node),
        Protocol::Ssr => encode_ssr(node),
        Protocol::Vmess => encode_vmess(node),
        Protocol::Trojan => encode_trojan(node),
        Protocol::Vless => encode_vless(node),
    }
}

/// URI 中的主机部分，IPv6 需要方括号
pub(crate) fn uri_host(server: &str) -> String {
    if server.contains(':') {
        format!("[{}]", server)
    } else {
        server.to_string()
    }
}

fn encode_ss(node: &Node) -> String {
    let user = format!(
        "{}:{}@{}:{}",
        node.method,
        node.password,
        uri_host(&node.server),
        node.port
    );
    format!(
        "ss://{}#{}",
        b64::encode_url_safe(&user),
        urlencoding::encode(&node.name)
    )
}

fn encode_ssr(node: &Node) -> String {
    let opts = node.ssr_opts();
    let main = format!(
        "{}:{}:{}:{}:{}:{}",
        node.server,
        node.port,
        opts.protocol,
        node.method,
        opts.obfs,
        b64::encode_url_safe(&node.password)
    );

    let mut params = Vec::new();
    if !opts.obfs_param.is_empty() {
        params.push(format!("obfsparam={}", b64::encode_url_safe(&opts.obfs_param)));
    }
    if !opts.protocol_param.is_empty() {
        params.push(format!(
            "protoparam={}",
            b64::encode_url_safe(&opts.protocol_param)
        ));
    }
    params.push(format!("remarks={}", b64::encode_url_safe(&node.name)));

    let full = format!("{}/?{}", main, params.join("&"));
    format!("ssr://{}", b64::encode_url_safe(&full))
}

/// vmess 分享 JSON，字段顺序即输出顺序
#[derive(Serialize)]
struct VmessShare {
    v: &'static str,
    ps: String,
    add: String,
    port: String,
    id: String,
    aid: String,
    scy: String,
    net: String,
    #[serde(rename = "type")]
    camouflage: String,
    host: String,
    path: String,
    tls: String,
    sni: String,
    alpn: String,
}

fn encode_vmess(node: &Node) -> String {
    let e = &node.extra;
    let share = VmessShare {
        v: "2",
        ps: node.name.clone(),
        add: node.server.clone(),
        port: node.port.to_string(),
        id: node.password.clone(),
        aid: node.alter_id().to_string(),
        scy: if node.method.is_empty() {
            "auto".to_string()
        } else {
            node.method.clone()
        },
        net: e.text_or("net", "tcp"),
        camouflage: e.text_or("type", "none"),
        host: e.text("host"),
        path: e.text("path"),
        tls: e.text("tls"),
        sni: e.text("sni"),
        alpn: e.text("alpn"),
    };
    // 纯字符串结构体序列化不会失败
    let json = serde_json::to_string(&share).unwrap_or_default();
    format!("vmess://{}", b64::encode_standard(&json))
}

/// ws/grpc 的路径参数，grpc 写成 serviceName
fn append_transport_params(query: &mut form_urlencoded::Serializer<'_, String>, node: &Node) {
    let t = node.transport();
    if !t.host.is_empty() {
        query.append_pair("host", &t.host);
    }
    if !t.path.is_empty() {
        let key = if t.is_grpc() { "serviceName" } else { "path" };
        query.append_pair(key, &t.path);
    }
}

/// 凭据做百分号编码，避免其中的 `#`、`?`、`@` 截断链接
fn plain_link(node: &Node, query: String) -> String {
    let mut link = format!(
        "{}{}@{}:{}",
        node.protocol.scheme(),
        urlencoding::encode(&node.password),
        uri_host(&node.server),
        node.port
    );
    if !query.is_empty() {
        link.push('?');
        link.push_str(&query);
    }
    link.push('#');
    link.push_str(&urlencoding::encode(&node.name));
    link
}

fn encode_trojan(node: &Node) -> String {
    let e = &node.extra;
    let mut query = form_urlencoded::Serializer::new(String::new());
    for key in ["sni", "type", "security"] {
        let value = e.text(key);
        if !value.is_empty() {
            query.append_pair(key, &value);
        }
    }
    if e.flag("skip_cert_verify") {
        query.append_pair("allowInsecure", "1");
    }
    append_transport_params(&mut query, node);
    plain_link(node, query.finish())
}

fn encode_vless(node: &Node) -> String {
    let e = &node.extra;
    let mut query = form_urlencoded::Serializer::new(String::new());
    if !node.method.is_empty() && node.method != "none" {
        query.append_pair("encryption", &node.method);
    }
    for key in ["flow", "type", "security", "sni", "alpn", "fp"] {
        let value = e.text(key);
        if !value.is_empty() {
            query.append_pair(key, &value);
        }
    }
    append_transport_params(&mut query, node);
    plain_link(node, query.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode::parse_link;

    fn assert_core_eq(a: &Node, b: &Node) {
        assert_eq!(a.protocol, b.protocol);
        assert_eq!(a.server, b.server);
        assert_eq!(a.port, b.port);
        assert_eq!(a.password, b.password);
        assert_eq!(a.method, b.method);
    }

    #[test]
    fn test_ss_link_shape() {
        let node = Node::new(Protocol::Ss, "1.2.3.4", 8388)
            .with_method("aes-128-gcm")
            .with_password("pw")
            .with_name("香港 01");
        let link = to_link(&node);
        assert!(link.starts_with("ss://"));
        assert!(!link.contains('='));
        assert!(link.ends_with("#%E9%A6%99%E6%B8%AF%2001"));

        let back = parse_link(&link).unwrap();
        assert_core_eq(&node, &back);
        assert_eq!(back.name, "香港 01");
    }

    #[test]
    fn test_ssr_round_trip() {
        let node = Node::new(Protocol::Ssr, "example.com", 443)
            .with_method("chacha20")
            .with_password("p@ss:word")
            .with_extra("protocol", "auth_sha1_v4")
            .with_extra("obfs", "http_simple")
            .with_extra("obfs_param", "cdn.example.com")
            .with_name("ssr node");
        let back = parse_link(&to_link(&node)).unwrap();
        assert_core_eq(&node, &back);
        assert_eq!(back.extra, node.extra);
        assert_eq!(back.name, "ssr node");
    }

    #[test]
    fn test_vmess_key_order() {
        let node = Node::new(Protocol::Vmess, "example.com", 443)
            .with_password("uuid")
            .with_method("auto")
            .with_extra("aid", 0i64)
            .with_extra("net", "ws");
        let link = to_link(&node);
        let json = b64::decode(link.trim_start_matches("vmess://")).unwrap();
        assert!(json.starts_with(r#"{"v":"2","ps":"VMess节点","add":"example.com","port":"443","id":"uuid","aid":"0","scy":"auto","net":"ws","type":"none""#));
    }

    #[test]
    fn test_vmess_round_trip() {
        let node = Node::new(Protocol::Vmess, "example.com", 443)
            .with_password("12345678-1234-1234-1234-123456789012")
            .with_method("aes-128-gcm")
            .with_extra("aid", 4i64)
            .with_extra("net", "ws")
            .with_extra("type", "none")
            .with_extra("host", "cdn.example.com")
            .with_extra("path", "/ray")
            .with_extra("tls", "tls")
            .with_extra("sni", "sni.example.com");
        let back = parse_link(&to_link(&node)).unwrap();
        assert_core_eq(&node, &back);
        assert_eq!(back.extra, node.extra);
    }

    #[test]
    fn test_trojan_round_trip() {
        let node = Node::new(Protocol::Trojan, "2001:db8::2", 443)
            .with_password("secret")
            .with_extra("sni", "sni.example.com")
            .with_extra("type", "ws")
            .with_extra("security", "tls")
            .with_extra("skip_cert_verify", true)
            .with_extra("path", "/ws path")
            .with_name("Trojan 日本");
        let link = to_link(&node);
        assert!(link.starts_with("trojan://secret@[2001:db8::2]:443?sni=sni.example.com&type=ws&security=tls&allowInsecure=1"));

        let back = parse_link(&link).unwrap();
        assert_core_eq(&node, &back);
        assert_eq!(back.extra, node.extra);
        assert_eq!(back.name, "Trojan 日本");
    }

    #[test]
    fn test_vless_round_trip() {
        let node = Node::new(Protocol::Vless, "example.com", 8443)
            .with_password("uuid-2")
            .with_method("none")
            .with_extra("flow", "xtls-rprx-vision")
            .with_extra("type", "grpc")
            .with_extra("security", "tls")
            .with_extra("sni", "example.com")
            .with_extra("fp", "chrome")
            .with_extra("path", "grpc-svc");
        let link = to_link(&node);
        assert!(!link.contains("encryption="));
        assert!(link.contains("serviceName=grpc-svc"));

        let back = parse_link(&link).unwrap();
        assert_core_eq(&node, &back);
        assert_eq!(back.extra, node.extra);
    }

    #[test]
    fn test_credentials_with_uri_delimiters() {
        for protocol in [Protocol::Trojan, Protocol::Vless] {
            for password in ["p#ss", "a?b", "u@3", "x/y", "50%"] {
                let node = Node::new(protocol, "example.com", 443)
                    .with_password(password)
                    .with_name("节点");
                let link = to_link(&node);
                let back = parse_link(&link).unwrap();
                assert_eq!(back.password, password, "{}", link);
                assert_eq!(back.server, "example.com");
                assert_eq!(back.port, 443);
                assert_eq!(back.name, "节点");
            }
        }

        let node = Node::new(Protocol::Trojan, "example.com", 443).with_password("plain-pass");
        assert!(to_link(&node).starts_with("trojan://plain-pass@example.com:443"));
    }
}
