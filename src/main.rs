use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{LevelFilter, error, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

use subs_aggregator::check::{self, LatencyProber, SortKey, TestResult};
use subs_aggregator::collector::{Collector, HttpFetcher};
use subs_aggregator::config::ConfigManager;
use subs_aggregator::dedup::{DedupMethod, Deduplicator};
use subs_aggregator::formatter::{self, Formatter, OutputFormat, STATS_FILE, Stats, TIMESTAMP_FORMAT};
use subs_aggregator::ui::ProgressTracker;

/// 代理节点聚合工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置目录
    #[arg(short = 'c', long, default_value = "config")]
    config_dir: PathBuf,

    /// 输出目录
    #[arg(short = 'o', long, default_value = "output")]
    output_dir: PathBuf,

    /// 跳过延迟测试
    #[arg(long)]
    skip_test: bool,

    /// 只处理指定名称的节点源
    #[arg(short = 's', long)]
    source: Option<String>,

    /// 输出格式，all 表示使用配置中的格式列表
    #[arg(short = 'f', long, value_enum, default_value_t = FormatArg::All)]
    format: FormatArg,

    /// 最大节点数（覆盖配置）
    #[arg(long)]
    max_nodes: Option<usize>,

    /// 显示探测进度条
    #[arg(long)]
    progress: bool,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 同时写入日志文件
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// 在配置目录写出默认配置后退出
    #[arg(long)]
    init_config: bool,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    All,
    Base64,
    Clash,
    V2ray,
    Surge,
    Quantumult,
}

impl FormatArg {
    fn resolve(self, configured: &[String]) -> Vec<OutputFormat> {
        match self {
            FormatArg::All => OutputFormat::parse_list(configured),
            FormatArg::Base64 => vec![OutputFormat::Base64],
            FormatArg::Clash => vec![OutputFormat::Clash],
            FormatArg::V2ray => vec![OutputFormat::V2ray],
            FormatArg::Surge => vec![OutputFormat::Surge],
            FormatArg::Quantumult => vec![OutputFormat::Quantumult],
        }
    }
}

/// 日志同时写到 stderr 和文件
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logger(args: &Args) -> Result<()> {
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::from_str(&args.log_level).unwrap_or(LevelFilter::Info)
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp_secs();
    if let Some(path) = &args.log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建日志目录: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("无法打开日志文件: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
    }
    builder.try_init().context("日志初始化失败")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args)?;

    if args.init_config {
        for path in ConfigManager::write_defaults(&args.config_dir)? {
            println!("📝 已写出默认配置: {}", path.display());
        }
        return Ok(());
    }

    println!("🚀 代理节点聚合工具 v{}", env!("CARGO_PKG_VERSION"));
    println!("{:=<80}", "");

    tokio::select! {
        result = run(args) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("用户中断，程序退出");
            Ok(())
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ConfigManager::load(&args.config_dir);
    let settings = &config.settings;

    let mut sources = config.enabled_sources();
    if let Some(name) = &args.source {
        sources = sources.only(name);
        if sources.is_empty() {
            bail!("未找到已启用的节点源: {}", name);
        }
    }
    info!("已加载 {} 个节点源", sources.len());

    let collector = Collector::new(HttpFetcher::new(&settings.general)?);
    let nodes = collector.collect_all(&sources).await;
    if nodes.is_empty() {
        error!("没有收集到任何节点");
        bail!("没有收集到任何节点");
    }
    info!("共收集到 {} 个节点", nodes.len());

    let dedup = Deduplicator::new(
        DedupMethod::parse_or_default(&settings.deduplication.method),
        settings.deduplication.keep_faster,
    );
    let nodes = dedup.filter_by_keywords(
        nodes,
        &settings.filter.exclude_keywords,
        &settings.filter.include_keywords,
    );

    let probe_enabled = settings.speed_test.enabled && !args.skip_test;
    let mut nodes = if probe_enabled {
        let progress = ProgressTracker::new(args.progress || settings.speed_test.progress);
        let prober = LatencyProber::new(&settings.speed_test).with_progress(progress);

        // 保留更快节点时需要先有速度数据，再去重
        let results = if dedup.keep_faster() {
            let results = prober.probe_all(nodes).await;
            check::remove_duplicate_results(&dedup, results)
        } else {
            let unique = dedup.remove_duplicates(nodes, None);
            prober.probe_all(unique).await
        };

        let stats = prober.get_stats();
        info!("探测成功率: {:.1}%", stats.get_success_rate());

        let results = prober.filter(results, settings.speed_test.filter_invalid);
        let results = check::sort_results(results, SortKey::parse_or_default(&settings.output.sort_by));
        print_top_results(&results);
        results.into_iter().map(|r| r.node).collect()
    } else {
        info!("跳过延迟测试");
        dedup.remove_duplicates(nodes, None)
    };

    if let Some(max) = settings.output.max_per_protocol {
        nodes = dedup.limit_nodes_per_protocol(nodes, max);
    }

    let max_nodes = args.max_nodes.unwrap_or(settings.output.max_nodes);
    if max_nodes > 0 && nodes.len() > max_nodes {
        info!("节点数 {} 超过上限 {}，截断", nodes.len(), max_nodes);
        nodes.truncate(max_nodes);
    }

    if nodes.is_empty() {
        warn!("过滤后没有剩余节点，仍然输出空文档");
    }

    let now = Local::now();
    let output_dir = formatter::prepare_output_dir(
        &args.output_dir,
        &now.format(TIMESTAMP_FORMAT).to_string(),
    )?;

    let formats = args.format.resolve(&settings.output.formats);
    if formats.is_empty() {
        warn!("没有可用的输出格式");
    }
    let emitter = Formatter::new(config.clash_template());
    for format in formats {
        match emitter.write(format, &nodes, &output_dir) {
            Ok(path) => info!("{} 格式已输出: {}", format, path.display()),
            Err(e) => error!("{} 格式输出失败: {:#}", format, e),
        }
    }

    let stats = Stats::from_nodes(&nodes, now);
    formatter::save_to_file(&stats.to_json()?, output_dir.join(STATS_FILE))?;
    print_summary(&stats, &output_dir);
    Ok(())
}

fn print_top_results(results: &[TestResult]) {
    for (i, result) in results.iter().take(10).enumerate() {
        info!(
            "{}. {} ({}) 延迟: {:.0}ms 速度: {:.1}",
            i + 1,
            result.node.name,
            result.node.protocol,
            result.latency_ms,
            result.speed
        );
    }
}

fn print_summary(stats: &Stats, output_dir: &std::path::Path) {
    println!("\n📊 统计摘要:");
    println!("{:=<80}", "");
    println!("  更新时间: {}", stats.update_time);
    println!("  节点总数: {}", stats.total_nodes);
    for (protocol, count) in &stats.protocols {
        println!("  {}: {}", protocol, count);
    }
    println!("  输出目录: {}", output_dir.display());
    println!("\n🎉 完成!");
}
