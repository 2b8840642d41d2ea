//! 分流规则评估命令行工具
//!
//! 读取条件树和请求的 JSON 文件，输出判定结果。

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use splitter_rules::{
    EngineConfig, EvaluationOptions, GeoIpLookup, NoGeoIp, RuleEngine, SplitRequest, StaticGeoIp,
    observability,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "splitter-eval", about = "Evaluate a splitter criteria tree against a request")]
struct Args {
    /// 条件树 JSON 文件
    #[arg(long)]
    criteria: PathBuf,

    /// 请求 JSON 文件
    #[arg(long)]
    request: PathBuf,

    /// 配置目录
    #[arg(long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// 静态 GeoIP 表 JSON 文件（地址 -> {country, region, city}）
    #[arg(long)]
    geo: Option<PathBuf>,
}

/// 输出的判定结果
#[derive(Debug, Serialize)]
struct Decision {
    matched: bool,
    emit_bid: bool,
    bucket: Option<u8>,
    geo: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load(&args.config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        EngineConfig::default()
    });
    observability::init(&config.observability)?;

    let geoip: Arc<dyn GeoIpLookup> = match &args.geo {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("failed to read geo table {}", path.display()))?;
            let table = StaticGeoIp::from_json(&json)
                .with_context(|| format!("invalid geo table {}", path.display()))?;
            info!(entries = table.len(), "static geoip table loaded");
            Arc::new(table)
        }
        None => Arc::new(NoGeoIp),
    };

    let engine = RuleEngine::builder().config(&config).geoip(geoip).build();

    let criteria_json = fs::read_to_string(&args.criteria)
        .with_context(|| format!("failed to read criteria {}", args.criteria.display()))?;
    let criteria = engine
        .compile_from_json(&criteria_json)
        .with_context(|| format!("invalid criteria {}", args.criteria.display()))?;

    let request_json = fs::read_to_string(&args.request)
        .with_context(|| format!("failed to read request {}", args.request.display()))?;
    let mut request = SplitRequest::from_json(&request_json)
        .with_context(|| format!("invalid request {}", args.request.display()))?;

    let mut options = EvaluationOptions::new();
    let matched = engine.evaluate(Some(&criteria), &mut request, &mut options);

    let decision = Decision {
        matched,
        emit_bid: request.annotations().emit_bid,
        bucket: options.bucket(),
        geo: options.geo().and_then(|g| g.as_str()).map(str::to_string),
    };
    println!("{}", serde_json::to_string_pretty(&decision)?);

    Ok(())
}
