//! ai-orch-cli: 缓存维护与配置检查的命令行工具
//!
//! Usage:
//!   ai-orch-cli config [--config <path>]             Print the effective configuration
//!   ai-orch-cli compact [--config <path>]            Run one cold-tier compaction
//!   ai-orch-cli invalidate <key> [--config <path>]   Remove one key from every tier
//!   ai-orch-cli stats [--config <path>]              Show cache tier sizes
//!   ai-orch-cli version                              Show version information

use ai_lib_orchestrator::cache::CacheKey;
use ai_lib_orchestrator::config::CONFIG_PATH_VAR;
use ai_lib_orchestrator::{OrchestratorBuilder, OrchestratorConfig};
use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "config" => cmd_config(&args[2..]),
        "compact" => cmd_compact(&args[2..]).await,
        "invalidate" => cmd_invalidate(&args[2..]).await,
        "stats" => cmd_stats(&args[2..]).await,
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"ai-orch-cli: 缓存维护与配置检查工具

USAGE:
    ai-orch-cli <COMMAND> [OPTIONS]

COMMANDS:
    config [--config <path>]            Print the effective configuration as YAML (secrets redacted)
    compact [--config <path>]           Remove expired cold entries and evict down to the size cap
    invalidate <key> [--config <path>]  Remove one cache key (64 hex chars) from every tier
    stats [--config <path>]             Show entry counts per tier and cold-tier size
    version                             Show version information
    help                                Show this help message

ENVIRONMENT:
    {var}                     YAML configuration file
    RUST_LOG                            Log filter (default: info)"#,
        var = CONFIG_PATH_VAR
    );
}

fn cmd_version() {
    println!(
        "ai-orch-cli {} (ai-lib-orchestrator {})",
        env!("CARGO_PKG_VERSION"),
        ai_lib_orchestrator::api::VERSION,
    );
}

/// `--config <path>` wins over the environment; env overrides apply either way.
fn load_config(args: &[String]) -> anyhow::Result<OrchestratorConfig> {
    for (i, arg) in args.iter().enumerate() {
        if arg == "--config" {
            let Some(path) = args.get(i + 1) else {
                bail!("--config needs a path");
            };
            let mut config = OrchestratorConfig::from_yaml_file(path)
                .with_context(|| format!("loading {path}"))?;
            config.apply_env_with(&|k: &str| std::env::var(k).ok())?;
            return Ok(config);
        }
    }
    Ok(OrchestratorConfig::load()?)
}

/// Arguments that are not `--config <path>`.
fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if arg == "--config" {
            skip = true;
            continue;
        }
        out.push(arg.as_str());
    }
    out
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    config.validate()?;
    print!("{}", config.redacted().to_yaml()?);
    Ok(())
}

async fn cmd_compact(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let cache = OrchestratorBuilder::open_cache(&config)?;
    let report = cache.compact().await?;
    println!("expired removed: {}", report.expired_removed);
    println!("evicted:         {}", report.evicted);
    println!(
        "cold size:       {} -> {} bytes (cap {})",
        report.size_before,
        report.size_after,
        config.cache.cold_max_bytes()
    );
    Ok(())
}

async fn cmd_invalidate(args: &[String]) -> anyhow::Result<()> {
    let rest = positional(args);
    let Some(raw) = rest.first() else {
        bail!("usage: ai-orch-cli invalidate <key>");
    };
    let key = CacheKey::from_hex(*raw)?;
    let config = load_config(args)?;
    let cache = OrchestratorBuilder::open_cache(&config)?;
    if cache.invalidate(&key).await? {
        println!("removed {key}");
    } else {
        println!("{key} was not cached");
    }
    Ok(())
}

async fn cmd_stats(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let cache = OrchestratorBuilder::open_cache(&config)?;
    let sizes = cache.tier_sizes().await;
    let cold_bytes = cache.cold_total_size().await?;
    let show = |n: Option<usize>| n.map_or_else(|| "unavailable".to_string(), |n| n.to_string());

    println!("memory entries: {}", sizes.memory);
    println!("warm entries:   {}", show(sizes.warm));
    println!("cold entries:   {}", show(sizes.cold));
    println!(
        "cold size:      {} bytes of {} ({:.1}%)",
        cold_bytes,
        config.cache.cold_max_bytes(),
        percent(cold_bytes, config.cache.cold_max_bytes())
    );
    println!("sqlite path:    {}", config.cache.sqlite_path.display());
    Ok(())
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
