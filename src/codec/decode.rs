//! 五种分享链接到 [`Node`] 的解码
//!
//! 每个解码函数只负责把文本拆成 [`Candidate`]，校验统一交给
//! [`Candidate::into_node`]。任何一步失败都以 [`ParseError`] 返回。

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use url::form_urlencoded;

use super::b64;
use crate::error::{ParseError, ParseResult};
use crate::proxy::{Candidate, Extras, Node, Protocol};

pub fn parse_link(link: &str) -> ParseResult<Node> {
    let link = link.trim();
    let protocol = Protocol::from_link(link).ok_or_else(|| {
        let prefix: String = link.chars().take(20).collect();
        ParseError::UnsupportedScheme(prefix)
    })?;

    let candidate = match protocol {
        Protocol::Ss => decode_ss(link)?,
        Protocol::Ssr => decode_ssr(link)?,
        Protocol::Vmess => decode_vmess(link)?,
        Protocol::Trojan => decode_trojan(link)?,
        Protocol::Vless => decode_vless(link)?,
    };
    candidate.raw_link(link).into_node()
}

fn percent_decode(s: &str) -> String {
    match urlencoding::decode(s) {
        Ok(cow) => cow.into_owned(),
        Err(_) => s.to_string(),
    }
}

/// 拆出 `#备注`，备注做百分号解码
fn split_fragment(body: &str) -> (&str, Option<String>) {
    match body.split_once('#') {
        Some((main, name)) => (main, Some(percent_decode(name))),
        None => (body, None),
    }
}

/// 拆分 `host:port`，支持 `[ipv6]:port`
fn split_host_port(s: &str) -> ParseResult<(String, String)> {
    let s = s.trim().trim_end_matches('/');
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or(ParseError::Malformed("IPv6 地址缺少 ]"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or(ParseError::Malformed("缺少端口"))?;
        return Ok((host.to_string(), port.to_string()));
    }
    let (host, port) = s
        .rsplit_once(':')
        .ok_or(ParseError::Malformed("缺少端口"))?;
    Ok((host.to_string(), port.to_string()))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn param_or<'a>(params: &'a HashMap<String, String>, key: &str, default: &'a str) -> &'a str {
    match params.get(key).map(|s| s.trim()) {
        Some(v) if !v.is_empty() => v,
        _ => default,
    }
}

/// `ss://base64(method:password@server:port)#name`，
/// 同时兼容 `ss://base64(method:password)@server:port` 写法
fn decode_ss(link: &str) -> ParseResult<Candidate> {
    let body = &link[Protocol::Ss.scheme().len()..];
    let (body, name) = split_fragment(body);

    let (userinfo, server_port) = match body.rsplit_once('@') {
        Some((userinfo, host_part)) => {
            let host_part = host_part.split('?').next().unwrap_or("");
            let userinfo = if userinfo.contains(':') {
                percent_decode(userinfo)
            } else {
                b64::decode(userinfo)?
            };
            (userinfo, host_part.to_string())
        }
        None => {
            let decoded = b64::decode(body)?;
            let (userinfo, host_part) = decoded
                .rsplit_once('@')
                .ok_or(ParseError::Malformed("缺少 @"))?;
            (userinfo.to_string(), host_part.to_string())
        }
    };

    let (method, password) = userinfo
        .split_once(':')
        .ok_or(ParseError::Malformed("缺少加密方式"))?;
    let (server, port) = split_host_port(&server_port)?;

    Ok(Candidate::new(Protocol::Ss, server, port)
        .password(password)
        .method(method)
        .name(name.unwrap_or_default()))
}

/// `ssr://base64(server:port:protocol:method:obfs:base64(password)/?params)`
fn decode_ssr(link: &str) -> ParseResult<Candidate> {
    let body = &link[Protocol::Ssr.scheme().len()..];
    let decoded = b64::decode(body)?;

    let (main, query) = match decoded.split_once('?') {
        Some((main, query)) => (main, query),
        None => (decoded.as_str(), ""),
    };
    let main = main.trim_end_matches('/');

    let mut params = HashMap::new();
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            params.insert(key.to_string(), b64::decode_or_raw(value));
        }
    }

    // 从右往左拆，服务器地址本身可能带冒号
    let mut parts: Vec<&str> = main.rsplitn(6, ':').collect();
    if parts.len() < 6 {
        return Err(ParseError::Malformed("SSR 主体字段不足"));
    }
    parts.reverse();
    let (server, port, protocol, method, obfs, password_b64) =
        (parts[0], parts[1], parts[2], parts[3], parts[4], parts[5]);

    let mut extra = Extras::new();
    extra.insert_non_empty("protocol", protocol);
    extra.insert_non_empty("obfs", obfs);
    extra.insert_non_empty("obfs_param", params.get("obfsparam").map_or("", |s| s.as_str()));
    extra.insert_non_empty(
        "protocol_param",
        params.get("protoparam").map_or("", |s| s.as_str()),
    );

    Ok(Candidate::new(Protocol::Ssr, server, port)
        .password(b64::decode_or_raw(password_b64))
        .method(method)
        .name(params.remove("remarks").unwrap_or_default())
        .extra(extra))
}

fn json_get_str(obj: &JsonValue, key: &str) -> String {
    match obj.get(key) {
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        Some(JsonValue::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// `vmess://base64(json)`
fn decode_vmess(link: &str) -> ParseResult<Candidate> {
    let body = &link[Protocol::Vmess.scheme().len()..];
    let json_text = b64::decode(body)?;
    let obj: JsonValue =
        serde_json::from_str(&json_text).map_err(|e| ParseError::Json(e.to_string()))?;
    if !obj.is_object() {
        return Err(ParseError::Json("不是 JSON 对象".to_string()));
    }

    let mut method = json_get_str(&obj, "scy");
    if method.is_empty() {
        method = "auto".to_string();
    }

    let mut extra = Extras::new();
    let aid = json_get_str(&obj, "aid");
    match aid.parse::<i64>() {
        Ok(n) => extra.insert("aid", n),
        Err(_) => extra.insert("aid", 0i64),
    }
    let net = json_get_str(&obj, "net");
    extra.insert("net", if net.is_empty() { "tcp".to_string() } else { net });
    let camouflage = json_get_str(&obj, "type");
    extra.insert(
        "type",
        if camouflage.is_empty() { "none".to_string() } else { camouflage },
    );
    for key in ["host", "path", "tls", "sni", "alpn"] {
        extra.insert_non_empty(key, &json_get_str(&obj, key));
    }

    Ok(
        Candidate::new(Protocol::Vmess, json_get_str(&obj, "add"), json_get_str(&obj, "port"))
            .password(json_get_str(&obj, "id"))
            .method(method)
            .name(json_get_str(&obj, "ps"))
            .extra(extra),
    )
}

/// trojan / vless 共用的 `credential@server:port?query#name` 拆分
struct PlainLink {
    credential: String,
    server: String,
    port: String,
    params: HashMap<String, String>,
    name: Option<String>,
}

fn split_plain_link(link: &str, protocol: Protocol) -> ParseResult<PlainLink> {
    let body = &link[protocol.scheme().len()..];
    let (body, name) = split_fragment(body);
    let (main, params) = match body.split_once('?') {
        Some((main, query)) => (main, parse_query(query)),
        None => (body, HashMap::new()),
    };
    let (credential, server_port) = main
        .rsplit_once('@')
        .ok_or(ParseError::Malformed("缺少 @"))?;
    let (server, port) = split_host_port(server_port)?;
    Ok(PlainLink {
        credential: percent_decode(credential),
        server,
        port,
        params,
        name,
    })
}

/// ws 的 host/path 与 grpc 的 serviceName 统一落在 host/path 上
fn insert_transport_params(extra: &mut Extras, params: &HashMap<String, String>) {
    extra.insert_non_empty("host", param_or(params, "host", ""));
    let path = param_or(params, "path", "");
    let path = if path.is_empty() {
        param_or(params, "serviceName", "")
    } else {
        path
    };
    extra.insert_non_empty("path", path);
}

/// `trojan://password@server:port?params#name`
fn decode_trojan(link: &str) -> ParseResult<Candidate> {
    let l = split_plain_link(link, Protocol::Trojan)?;
    let p = &l.params;

    let mut extra = Extras::new();
    let sni = param_or(p, "sni", param_or(p, "peer", ""));
    extra.insert("sni", sni);
    extra.insert("type", param_or(p, "type", "tcp"));
    extra.insert("security", param_or(p, "security", "tls"));
    extra.insert("skip_cert_verify", param_or(p, "allowInsecure", "0") == "1");
    insert_transport_params(&mut extra, p);

    Ok(Candidate::new(Protocol::Trojan, l.server, l.port)
        .password(l.credential)
        .name(l.name.unwrap_or_default())
        .extra(extra))
}

/// `vless://uuid@server:port?params#name`
fn decode_vless(link: &str) -> ParseResult<Candidate> {
    let l = split_plain_link(link, Protocol::Vless)?;
    let p = &l.params;

    let mut extra = Extras::new();
    extra.insert_non_empty("flow", param_or(p, "flow", ""));
    extra.insert("type", param_or(p, "type", "tcp"));
    extra.insert("security", param_or(p, "security", "none"));
    extra.insert_non_empty("sni", param_or(p, "sni", param_or(p, "peer", "")));
    extra.insert_non_empty("alpn", param_or(p, "alpn", ""));
    extra.insert_non_empty("fp", param_or(p, "fp", ""));
    insert_transport_params(&mut extra, p);

    Ok(Candidate::new(Protocol::Vless, l.server, l.port)
        .password(l.credential)
        .method(param_or(p, "encryption", "none"))
        .name(l.name.unwrap_or_default())
        .extra(extra))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ExtraValue;

    #[test]
    fn test_parse_ss_link() {
        let link = "ss://YWVzLTI1Ni1nY206dGVzdHBhc3N3b3JkQDEyNy4wLjAuMTo4MDgw#TestSS";
        let node = parse_link(link).unwrap();
        assert_eq!(node.protocol, Protocol::Ss);
        assert_eq!(node.server, "127.0.0.1");
        assert_eq!(node.port, 8080);
        assert_eq!(node.method, "aes-256-gcm");
        assert_eq!(node.password, "testpassword");
        assert!(node.name.contains("TestSS"));
        assert_eq!(node.raw_link, link);
    }

    #[test]
    fn test_parse_ss_sip002_form() {
        let userinfo = b64::encode_url_safe("chacha20-ietf-poly1305:pass");
        let link = format!(
            "ss://{}@example.com:8388/?plugin=obfs#%E9%A6%99%E6%B8%AF",
            userinfo
        );
        let node = parse_link(&link).unwrap();
        assert_eq!(node.server, "example.com");
        assert_eq!(node.port, 8388);
        assert_eq!(node.method, "chacha20-ietf-poly1305");
        assert_eq!(node.name, "香港");
    }

    #[test]
    fn test_parse_ss_default_name() {
        let body = b64::encode_url_safe("aes-128-gcm:pw@example.com:443");
        let node = parse_link(&format!("ss://{}", body)).unwrap();
        assert_eq!(node.name, "SS节点");
    }

    #[test]
    fn test_parse_ssr_link() {
        let main = format!(
            "example.com:8443:auth_aes128_md5:aes-256-cfb:tls1.2_ticket_auth:{}/?obfsparam={}&remarks={}",
            b64::encode_url_safe("secret"),
            b64::encode_url_safe("cdn.example.com"),
            b64::encode_url_safe("SSR测试"),
        );
        let link = format!("ssr://{}", b64::encode_url_safe(&main));
        let node = parse_link(&link).unwrap();
        assert_eq!(node.protocol, Protocol::Ssr);
        assert_eq!(node.server, "example.com");
        assert_eq!(node.port, 8443);
        assert_eq!(node.password, "secret");
        assert_eq!(node.method, "aes-256-cfb");
        assert_eq!(node.name, "SSR测试");
        assert_eq!(node.extra.text("protocol"), "auth_aes128_md5");
        assert_eq!(node.extra.text("obfs"), "tls1.2_ticket_auth");
        assert_eq!(node.extra.text("obfs_param"), "cdn.example.com");
        assert!(node.extra.get("protocol_param").is_none());
    }

    #[test]
    fn test_parse_vmess_link() {
        let json = r#"{"v":"2","ps":"TestVMess","add":"127.0.0.1","port":"443","id":"12345678-1234-1234-1234-123456789012","aid":"0","net":"ws","type":"none","host":"cdn.example.com","path":"/ray","tls":"tls"}"#;
        let link = format!("vmess://{}", b64::encode_standard(json));
        let node = parse_link(&link).unwrap();
        assert_eq!(node.protocol, Protocol::Vmess);
        assert_eq!(node.port, 443);
        assert_eq!(node.password, "12345678-1234-1234-1234-123456789012");
        assert_eq!(node.method, "auto");
        assert_eq!(node.name, "TestVMess");
        assert_eq!(node.extra.get("aid"), Some(&ExtraValue::Int(0)));
        assert_eq!(node.extra.text("net"), "ws");
        assert_eq!(node.extra.text("path"), "/ray");
        assert!(node.extra.get("sni").is_none());
    }

    #[test]
    fn test_parse_vmess_numeric_port() {
        let json = r#"{"add":"example.com","port":8443,"id":"uuid","aid":2,"ps":"n"}"#;
        let link = format!("vmess://{}", b64::encode_standard(json));
        let node = parse_link(&link).unwrap();
        assert_eq!(node.port, 8443);
        assert_eq!(node.alter_id(), 2);
        assert_eq!(node.extra.text("net"), "tcp");
    }

    #[test]
    fn test_parse_vmess_invalid_base64() {
        assert_eq!(parse_link("vmess://@@@not-base64@@@"), Err(ParseError::Base64));
        let not_json = format!("vmess://{}", b64::encode_standard("plain text"));
        assert!(matches!(parse_link(&not_json), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_parse_trojan_link() {
        let link = "trojan://pass@example.com:443?peer=sni.example.com&allowInsecure=1#Trojan%20HK";
        let node = parse_link(link).unwrap();
        assert_eq!(node.protocol, Protocol::Trojan);
        assert_eq!(node.password, "pass");
        assert_eq!(node.method, "");
        assert_eq!(node.name, "Trojan HK");
        assert_eq!(node.extra.text("sni"), "sni.example.com");
        assert_eq!(node.extra.text("type"), "tcp");
        assert_eq!(node.extra.text("security"), "tls");
        assert!(node.extra.flag("skip_cert_verify"));
    }

    #[test]
    fn test_parse_vless_link() {
        let link = "vless://uuid-1@[2001:db8::1]:443?type=grpc&security=tls&serviceName=svc&flow=xtls-rprx-vision&fp=chrome#v";
        let node = parse_link(link).unwrap();
        assert_eq!(node.server, "2001:db8::1");
        assert_eq!(node.password, "uuid-1");
        assert_eq!(node.method, "none");
        assert_eq!(node.extra.text("type"), "grpc");
        assert_eq!(node.extra.text("security"), "tls");
        assert_eq!(node.extra.text("path"), "svc");
        assert_eq!(node.extra.text("flow"), "xtls-rprx-vision");
        assert_eq!(node.extra.text("fp"), "chrome");
    }

    #[test]
    fn test_invalid_and_unsupported() {
        assert!(matches!(
            parse_link("http://example.com:80"),
            Err(ParseError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            parse_link("trojan://pass@example.com:70000"),
            Err(ParseError::InvalidNode(_))
        ));
        assert!(matches!(
            parse_link("trojan://example.com:443"),
            Err(ParseError::Malformed(_))
        ));
    }
}
