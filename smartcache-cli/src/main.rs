//! SmartCache CLI
//!
//! Command-line interface for inspecting and operating on a SmartCache backend.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use smartcache::SmartCache;
use smartcache_core::settings::{BackendKind, Settings};
use smartcache_core::types::{CacheKey, CachedEntry, CallSignature};
use smartcache_keys::derive_call_key;

/// SmartCache - automatic caching and caching invalidation
#[derive(Parser)]
#[command(name = "smartcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Cache backend (memory, redis, memcached)
    #[arg(long, global = true, env = "SMARTCACHE_BACKEND")]
    backend: Option<BackendKind>,

    /// Backend host or URL
    #[arg(long, global = true, env = "SMARTCACHE_HOST")]
    host: Option<String>,

    /// Key prefix
    #[arg(long, global = true, env = "SMARTCACHE_PREFIX")]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the backend is reachable
    Ping,

    /// Print the cache key of a call
    Key {
        /// Memoized function name
        function: String,
        /// Call argument as JSON (e.g. 42, '"text"', '[1,2]'); several values form a tuple
        args: Vec<String>,
    },

    /// Show the entry stored under a key
    Get {
        /// Full backend key
        key: String,
    },

    /// Delete the entry stored under a key
    Delete {
        /// Full backend key
        key: String,
    },

    /// Invalidate every entry depending on a dependency
    Invalidate {
        /// Dependency name
        dependency: String,
    },

    /// Remove every key under the prefix
    Purge {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Measure memoized call throughput against the backend
    Bench {
        /// Number of calls
        #[arg(short, long, default_value = "10000")]
        count: usize,
        /// Number of distinct arguments
        #[arg(short, long, default_value = "100")]
        distinct: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "smartcache=debug,info"
    } else {
        "smartcache=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = settings(&cli)?;
    debug!(?settings, "Settings resolved");

    match cli.command {
        Commands::Ping => cmd_ping(settings).await,
        Commands::Key { function, args } => cmd_key(&settings, &function, &args),
        Commands::Get { key } => cmd_get(settings, &key).await,
        Commands::Delete { key } => cmd_delete(settings, &key).await,
        Commands::Invalidate { dependency } => cmd_invalidate(settings, &dependency).await,
        Commands::Purge { yes } => cmd_purge(settings, yes).await,
        Commands::Bench { count, distinct } => cmd_bench(settings, count, distinct).await,
    }
}

/// Environment settings with command-line overrides applied
fn settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::from_env().context("Invalid SMARTCACHE_* environment")?;
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    if let Some(host) = &cli.host {
        settings.host = Some(host.clone());
    }
    if let Some(prefix) = &cli.prefix {
        settings.key_prefix = prefix.clone();
    }
    settings.verbose |= cli.verbose;
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

async fn connect(settings: Settings) -> Result<SmartCache> {
    let backend = settings.backend;
    SmartCache::connect(settings)
        .await
        .with_context(|| format!("Failed to connect to {backend} backend"))
}

/// Ping the backend
async fn cmd_ping(settings: Settings) -> Result<()> {
    println!(
        "{} {} ({})",
        "🔌 Pinging".cyan().bold(),
        settings.backend,
        settings.resolved_host()
    );

    let cache = connect(settings).await?;
    let start = Instant::now();
    cache.ping().await.context("Ping failed")?;

    println!("{} {:?}", "✅ Backend reachable in".green(), start.elapsed());
    Ok(())
}

/// Builds the argument value a memoized function would see.
///
/// No values is `()`, one value is itself, and several form a tuple.
fn call_argument(args: &[String]) -> Result<serde_json::Value> {
    let mut values = args
        .iter()
        .map(|arg| {
            serde_json::from_str(arg).with_context(|| format!("Argument is not valid JSON: {arg}"))
        })
        .collect::<Result<Vec<serde_json::Value>>>()?;

    Ok(match values.len() {
        0 => serde_json::Value::Null,
        1 => values.remove(0),
        _ => serde_json::Value::Array(values),
    })
}

/// Derive the key of a call
fn cmd_key(settings: &Settings, function: &str, args: &[String]) -> Result<()> {
    let signature = CallSignature::from_args(function, &call_argument(args)?)?;

    let key = derive_call_key(&settings.key_prefix, &signature).context("Failed to derive key")?;

    println!("{}", "🔑 Call signature:".cyan().bold());
    println!("{}", serde_json::to_string_pretty(&signature)?);
    println!("\n{} {}", "Key:".green().bold(), key);
    Ok(())
}

/// Show a stored entry
async fn cmd_get(settings: Settings, key: &str) -> Result<()> {
    let key = CacheKey::new(key).context("Invalid key")?;
    let cache = connect(settings).await?;

    let Some(raw) = cache.backend().get(&key).await? else {
        println!("{} {}", "⚠️  Not found:".yellow(), key);
        return Ok(());
    };

    match CachedEntry::decode(&raw) {
        Ok(entry) => {
            let now = chrono::Utc::now();
            println!("{} {}", "📦 Entry:".cyan().bold(), key);
            println!("   {} {}", "Created:".dimmed(), entry.created_at);
            match entry.expires_at {
                Some(expires_at) if entry.is_expired(now) => {
                    println!("   {} {} {}", "Expires:".dimmed(), expires_at, "(expired)".red())
                }
                Some(expires_at) => println!("   {} {}", "Expires:".dimmed(), expires_at),
                None => println!("   {} never", "Expires:".dimmed()),
            }
            if !entry.dependencies.is_empty() {
                println!("   {}", "Dependencies:".dimmed());
                for (name, generation) in &entry.dependencies {
                    println!("      {name} @ generation {generation}");
                }
            }
            println!("\n{}", "Value (JSON):".yellow().bold());
            println!("{}", serde_json::to_string_pretty(&entry.value)?);
        }
        Err(e) => {
            println!("{} {}", "⚠️  Not a SmartCache entry:".yellow(), e);
            println!("{}", String::from_utf8_lossy(&raw));
        }
    }
    Ok(())
}

/// Delete a key
async fn cmd_delete(settings: Settings, key: &str) -> Result<()> {
    let key = CacheKey::new(key).context("Invalid key")?;
    let cache = connect(settings).await?;

    if cache.delete_key(&key).await? {
        println!("{} {}", "🗑️  Deleted:".green(), key);
    } else {
        println!("{} {}", "⚠️  Not found:".yellow(), key);
    }
    Ok(())
}

/// Bump a dependency generation
async fn cmd_invalidate(settings: Settings, dependency: &str) -> Result<()> {
    let cache = connect(settings).await?;
    let generation = cache
        .invalidate_dependency(dependency)
        .await
        .context("Failed to invalidate dependency")?;

    println!(
        "{} {} {} {}",
        "♻️  Invalidated".green().bold(),
        dependency,
        "-> generation".dimmed(),
        generation
    );
    Ok(())
}

/// Purge the prefix
async fn cmd_purge(settings: Settings, yes: bool) -> Result<()> {
    if settings.backend == BackendKind::Memcached {
        println!(
            "{}",
            "⚠️  Memcached cannot list keys: purge flushes the whole server.".yellow()
        );
    }

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Remove every key under '{}:' on {}?",
                settings.key_prefix,
                settings.resolved_host()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let prefix = settings.key_prefix.clone();
    let cache = connect(settings).await?;
    cache.purge().await.context("Purge failed")?;

    println!("{} {}:*", "✅ Purged".green(), prefix);
    Ok(())
}

/// Run a memoization benchmark
async fn cmd_bench(settings: Settings, count: usize, distinct: u64) -> Result<()> {
    if distinct == 0 {
        bail!("--distinct must be at least 1");
    }

    println!(
        "{} {} calls over {} distinct arguments",
        "📊 Benchmarking".cyan().bold(),
        count,
        distinct
    );

    let cache = connect(settings).await?;
    let square = cache
        .memoize("smartcache::bench::square")
        .ttl(Duration::from_secs(300))
        .build(|n: u64| async move {
            // Stand-in for real work
            tokio::time::sleep(Duration::from_micros(200)).await;
            Ok::<_, Infallible>(n * n)
        })?;

    let inputs: Vec<u64> = {
        let mut rng = rand::thread_rng();
        (0..count).map(|_| rng.gen_range(0..distinct)).collect()
    };

    let pb = ProgressBar::new(count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("   [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    for n in inputs {
        let squared = square.call(n).await?;
        if squared != n * n {
            bail!("Wrong result for {n}: {squared}");
        }
        pb.inc(1);
    }
    pb.finish();
    let elapsed = start.elapsed();

    let stats = cache.stats();
    let rate = count as f64 / elapsed.as_secs_f64();

    println!("\n{}", "📈 Results:".green().bold());
    println!("   Total time: {:?}", elapsed);
    println!("   Throughput: {:.0} calls/sec", rate);
    println!(
        "   Time per call: {:.2}µs",
        elapsed.as_micros() as f64 / count.max(1) as f64
    );
    println!(
        "   Hits: {}  Misses: {}  Hit rate: {:.1}%",
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    );
    if stats.backend_errors > 0 {
        println!("   {} {} backend errors", "❌".red(), stats.backend_errors);
    }

    println!("\n{}", "Cleaning up...".dimmed());
    for n in 0..distinct {
        square.invalidate(&n).await?;
    }
    println!("   ✓ Removed benchmark entries");

    Ok(())
}
