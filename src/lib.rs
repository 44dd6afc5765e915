//! 代理节点聚合：收集订阅、解析、去重、延迟探测并输出多种客户端格式

pub mod check;
pub mod codec;
pub mod collector;
pub mod config;
pub mod dedup;
pub mod error;
pub mod formatter;
pub mod proxy;
pub mod ui;
