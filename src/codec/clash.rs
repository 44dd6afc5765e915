//! Clash 代理映射与配置文档

use serde_yaml::{Mapping, Number, Value as YamlValue};

use crate::error::{ParseError, ParseResult};
use crate::proxy::{Candidate, Extras, Node, Protocol, Transport};

pub const AUTO_SELECT: &str = "♻️ 自动选择";
pub const LOAD_BALANCE: &str = "🔮 负载均衡";
pub const NODE_SELECT: &str = "🚀 节点选择";

fn put(m: &mut Mapping, key: &str, value: impl Into<YamlValue>) {
    m.insert(YamlValue::from(key), value.into());
}

fn num(n: i64) -> YamlValue {
    YamlValue::Number(Number::from(n))
}

fn y_map_get<'a>(m: &'a Mapping, key: &str) -> Option<&'a YamlValue> {
    m.get(key)
}

fn y_str(v: Option<&YamlValue>) -> String {
    match v {
        Some(YamlValue::String(s)) => s.trim().to_string(),
        Some(YamlValue::Number(n)) => n.to_string(),
        Some(YamlValue::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn y_bool(v: Option<&YamlValue>) -> bool {
    match v {
        Some(YamlValue::Bool(b)) => *b,
        Some(YamlValue::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(YamlValue::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

fn y_path<'a>(m: &'a Mapping, keys: &[&str]) -> Option<&'a YamlValue> {
    let (last, parents) = keys.split_last()?;
    let mut cur = m;
    for key in parents {
        cur = y_map_get(cur, key)?.as_mapping()?;
    }
    y_map_get(cur, last)
}

/// ws-opts / grpc-opts，按传输类型写入
fn put_transport_opts(proxy: &mut Mapping, t: &Transport) {
    if t.is_ws() {
        put(proxy, "network", "ws");
        let mut headers = Mapping::new();
        put(&mut headers, "Host", t.host.as_str());
        let mut opts = Mapping::new();
        put(&mut opts, "path", if t.path.is_empty() { "/" } else { t.path.as_str() });
        put(&mut opts, "headers", headers);
        put(proxy, "ws-opts", opts);
    } else if t.is_grpc() {
        put(proxy, "network", "grpc");
        let mut opts = Mapping::new();
        put(&mut opts, "grpc-service-name", t.path.as_str());
        put(proxy, "grpc-opts", opts);
    } else if t.network != "tcp" {
        put(proxy, "network", t.network.as_str());
    }
}

/// 节点转换为 Clash proxies 列表中的一项
pub fn to_clash_proxy(node: &Node) -> Mapping {
    let mut proxy = Mapping::new();
    put(&mut proxy, "name", node.name.as_str());
    put(&mut proxy, "type", node.protocol.as_str());
    put(&mut proxy, "server", node.server.as_str());
    put(&mut proxy, "port", num(i64::from(node.port)));

    match node.protocol {
        Protocol::Ss => {
            put(&mut proxy, "cipher", node.method.as_str());
            put(&mut proxy, "password", node.password.as_str());
        }
        Protocol::Ssr => {
            let opts = node.ssr_opts();
            put(&mut proxy, "cipher", node.method.as_str());
            put(&mut proxy, "password", node.password.as_str());
            put(&mut proxy, "protocol", opts.protocol);
            put(&mut proxy, "obfs", opts.obfs);
            put(&mut proxy, "protocol-param", opts.protocol_param);
            put(&mut proxy, "obfs-param", opts.obfs_param);
        }
        Protocol::Vmess => {
            put(&mut proxy, "uuid", node.password.as_str());
            put(&mut proxy, "alterId", num(node.alter_id()));
            put(
                &mut proxy,
                "cipher",
                if node.method.is_empty() { "auto" } else { node.method.as_str() },
            );
            let t = node.transport();
            put_transport_opts(&mut proxy, &t);
            if t.tls {
                put(&mut proxy, "tls", true);
                if !t.sni.is_empty() {
                    put(&mut proxy, "servername", t.sni);
                }
            }
        }
        Protocol::Trojan => {
            put(&mut proxy, "password", node.password.as_str());
            let t = node.transport();
            if !t.sni.is_empty() {
                put(&mut proxy, "sni", t.sni.as_str());
            }
            if t.allow_insecure {
                put(&mut proxy, "skip-cert-verify", true);
            }
            put_transport_opts(&mut proxy, &t);
        }
        Protocol::Vless => {
            put(&mut proxy, "uuid", node.password.as_str());
            let flow = node.extra.text("flow");
            if !flow.is_empty() {
                put(&mut proxy, "flow", flow);
            }
            let t = node.transport();
            put_transport_opts(&mut proxy, &t);
            if t.tls {
                put(&mut proxy, "tls", true);
                if !t.sni.is_empty() {
                    put(&mut proxy, "servername", t.sni);
                }
            }
            let fp = node.extra.text("fp");
            if !fp.is_empty() {
                put(&mut proxy, "client-fingerprint", fp);
            }
        }
    }
    proxy
}

/// 从 ws-opts / grpc-opts 读回 host 与 path
fn read_transport_opts(proxy: &Mapping, extra: &mut Extras) {
    let ws_path = y_str(y_path(proxy, &["ws-opts", "path"]));
    let grpc_name = y_str(y_path(proxy, &["grpc-opts", "grpc-service-name"]));
    extra.insert_non_empty("host", &y_str(y_path(proxy, &["ws-opts", "headers", "Host"])));
    extra.insert_non_empty("path", if ws_path.is_empty() { &grpc_name } else { &ws_path });
}

/// Clash proxies 中的一项转换为节点，不认识的 type 返回 `UnsupportedProxyType`
pub fn from_clash_proxy(proxy: &Mapping) -> ParseResult<Node> {
    let kind = y_str(y_map_get(proxy, "type")).to_ascii_lowercase();
    let protocol: Protocol = kind
        .parse()
        .map_err(|_| ParseError::UnsupportedProxyType(kind.clone()))?;

    let get = |key: &str| y_str(y_map_get(proxy, key));
    let or = |value: String, default: &str| {
        if value.is_empty() { default.to_string() } else { value }
    };

    let mut candidate = Candidate::new(protocol, get("server"), get("port")).name(get("name"));
    let mut extra = Extras::new();

    match protocol {
        Protocol::Ss => {
            candidate = candidate.password(get("password")).method(get("cipher"));
        }
        Protocol::Ssr => {
            candidate = candidate.password(get("password")).method(get("cipher"));
            extra.insert_non_empty("protocol", &get("protocol"));
            extra.insert_non_empty("obfs", &get("obfs"));
            extra.insert_non_empty("obfs_param", &get("obfs-param"));
            extra.insert_non_empty("protocol_param", &get("protocol-param"));
        }
        Protocol::Vmess => {
            candidate = candidate
                .password(get("uuid"))
                .method(or(get("cipher"), "auto"));
            extra.insert("aid", get("alterId").parse::<i64>().unwrap_or(0));
            extra.insert("net", or(get("network"), "tcp"));
            extra.insert("type", "none");
            read_transport_opts(proxy, &mut extra);
            if y_bool(y_map_get(proxy, "tls")) {
                extra.insert("tls", "tls");
            }
            extra.insert_non_empty("sni", &get("servername"));
        }
        Protocol::Trojan => {
            candidate = candidate.password(get("password"));
            extra.insert("sni", get("sni"));
            extra.insert("type", or(get("network"), "tcp"));
            extra.insert("security", "tls");
            extra.insert(
                "skip_cert_verify",
                y_bool(y_map_get(proxy, "skip-cert-verify")),
            );
            read_transport_opts(proxy, &mut extra);
        }
        Protocol::Vless => {
            candidate = candidate
                .password(get("uuid"))
                .method(or(get("encryption"), "none"));
            extra.insert_non_empty("flow", &get("flow"));
            extra.insert("type", or(get("network"), "tcp"));
            let security = if y_bool(y_map_get(proxy, "tls")) { "tls" } else { "none" };
            extra.insert("security", security);
            extra.insert_non_empty("sni", &get("servername"));
            extra.insert_non_empty("fp", &get("client-fingerprint"));
            read_transport_opts(proxy, &mut extra);
        }
    }

    candidate.extra(extra).into_node()
}

/// 没有配置模板时使用的最小 Clash 配置
pub fn default_template() -> Mapping {
    let mut group = Mapping::new();
    put(&mut group, "name", NODE_SELECT);
    put(&mut group, "type", "select");
    put(&mut group, "proxies", vec!["DIRECT"]);

    let mut template = Mapping::new();
    put(&mut template, "port", num(7890));
    put(&mut template, "socks-port", num(7891));
    put(&mut template, "allow-lan", false);
    put(&mut template, "mode", "rule");
    put(&mut template, "log-level", "info");
    put(&mut template, "external-controller", "127.0.0.1:9090");
    put(&mut template, "proxies", YamlValue::Sequence(Vec::new()));
    put(&mut template, "proxy-groups", vec![YamlValue::Mapping(group)]);
    put(
        &mut template,
        "rules",
        vec!["GEOIP,CN,DIRECT".to_string(), format!("MATCH,{}", NODE_SELECT)],
    );
    template
}

/// 把模板中的三个固定代理组改写为引用全部节点名，其余字段原样保留
fn rewrite_groups(groups: &mut [YamlValue], names: &[String]) {
    let present: Vec<String> = groups
        .iter()
        .filter_map(|g| g.as_mapping())
        .map(|g| y_str(y_map_get(g, "name")))
        .collect();

    let all: Vec<YamlValue> = names.iter().map(|n| YamlValue::from(n.as_str())).collect();
    let mut select: Vec<YamlValue> = [AUTO_SELECT, LOAD_BALANCE]
        .into_iter()
        .filter(|g| present.iter().any(|p| p == g))
        .map(YamlValue::from)
        .collect();
    select.push(YamlValue::from("DIRECT"));
    select.extend(all.iter().cloned());

    for group in groups.iter_mut() {
        let Some(g) = group.as_mapping_mut() else {
            continue;
        };
        let name = y_str(y_map_get(g, "name"));
        if name == AUTO_SELECT || name == LOAD_BALANCE {
            put(g, "proxies", all.clone());
        } else if name == NODE_SELECT {
            put(g, "proxies", select.clone());
        }
    }
}

/// 生成完整的 Clash YAML 文档
pub fn render_document(nodes: &[Node], template: &Mapping) -> Result<String, serde_yaml::Error> {
    let proxies: Vec<YamlValue> = nodes
        .iter()
        .map(|n| YamlValue::Mapping(to_clash_proxy(n)))
        .collect();
    let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();

    let mut config = template.clone();
    put(&mut config, "proxies", proxies);
    if let Some(YamlValue::Sequence(groups)) = config.get_mut("proxy-groups") {
        rewrite_groups(groups, &names);
    }

    log::info!("生成 Clash 配置，包含 {} 个节点", nodes.len());
    serde_yaml::to_string(&config)
}

/// 解析 Clash 订阅文本中的 proxies 列表
///
/// 返回成功的节点和被跳过条目的原因；整个文档不是合法 YAML 时返回错误。
pub fn parse_document(text: &str) -> Result<(Vec<Node>, Vec<ParseError>), serde_yaml::Error> {
    let doc: YamlValue = serde_yaml::from_str(text)?;
    let mut nodes = Vec::new();
    let mut skipped = Vec::new();

    let proxies = doc
        .as_mapping()
        .and_then(|m| y_map_get(m, "proxies"))
        .and_then(|v| v.as_sequence());
    for item in proxies.into_iter().flatten() {
        let Some(map) = item.as_mapping() else {
            skipped.push(ParseError::Malformed("proxies 条目不是映射"));
            continue;
        };
        match from_clash_proxy(map) {
            Ok(node) => nodes.push(node),
            Err(e) => skipped.push(e),
        }
    }
    Ok((nodes, skipped))
}
