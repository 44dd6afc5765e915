//! 分享链接与各客户端格式之间的编解码

pub mod b64;
pub mod clash;
pub mod decode;
pub mod encode;
pub mod quantumult;
pub mod surge;
pub mod v2ray;

use log::debug;

use crate::error::ParseError;
use crate::proxy::Node;

pub use decode::parse_link;
pub use encode::to_link;

/// 解析单条链接，失败只记录 debug 日志
pub fn parse(link: &str) -> Option<Node> {
    match parse_link(link) {
        Ok(node) => Some(node),
        Err(e) => {
            debug!("跳过链接: {}", e);
            None
        }
    }
}

/// 批量解析的结果：成功的节点按输入顺序排列，跳过的条目记录下标和原因
#[derive(Debug, Default)]
pub struct ParseReport {
    pub nodes: Vec<Node>,
    pub skipped: Vec<(usize, ParseError)>,
}

impl ParseReport {
    pub fn total(&self) -> usize {
        self.nodes.len() + self.skipped.len()
    }
}

pub fn parse_batch_report<I, S>(links: I) -> ParseReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = ParseReport::default();
    for (index, link) in links.into_iter().enumerate() {
        match parse_link(link.as_ref()) {
            Ok(node) => report.nodes.push(node),
            Err(e) => {
                debug!("第 {} 条链接解析失败: {}", index + 1, e);
                report.skipped.push((index, e));
            }
        }
    }
    report
}

pub fn parse_batch<I, S>(links: I) -> Vec<Node>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parse_batch_report(links).nodes
}
