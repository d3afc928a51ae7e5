//! ShardRaft - Sharded, Replicated Record Store
//!
//! Command line entry point: runs a local cluster demo and manages the
//! configuration file.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardraft::cluster::ClusterCoordinator;
use shardraft::config::ShardRaftConfig;
use shardraft::error::Result;

/// ShardRaft - Sharded, Replicated Record Store
#[derive(Parser)]
#[command(name = "shardraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "shardraft.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a local cluster, insert sample records and print them
    Run {
        /// Number of sample records to insert
        #[arg(short, long, default_value_t = 80)]
        records: usize,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "shardraft.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show cluster configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format);

    match cli.command {
        Commands::Run { records } => run_demo(config, records).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(&config),
    }
}

/// Read the config file, or fall back to defaults if there is none
fn load_config(path: &Path) -> Result<ShardRaftConfig> {
    if path.exists() {
        ShardRaftConfig::from_file(path)
    } else {
        Ok(ShardRaftConfig::default())
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the cluster, insert `records` sample records and dump the result
async fn run_demo(config: ShardRaftConfig, records: usize) -> Result<()> {
    let replication_factor = config.cluster.replication_factor;
    let mut cluster = ClusterCoordinator::new(config).await?;

    let first = cluster.node_ids().len() as u64 + 1;
    for node_id in first..=replication_factor as u64 {
        cluster.add_node(node_id).await?;
    }

    cluster.start_raft_nodes(None).await?;

    for i in 0..records {
        cluster
            .insert_data(
                format!("Name{}", i),
                format!("email{}@example.com", i),
                format!("Sample data {}", i),
            )
            .await?;
    }

    let rows = cluster.query_data().await?;
    println!("{}", serde_json::to_string_pretty(&rows)?);

    println!();
    println!("Shard Distribution");
    println!("==================");
    for (shard_id, replicas) in cluster.placement().assignments() {
        let shard = cluster.shard(shard_id)?;
        println!("  {} (records {}..={}): nodes {:?}", shard.table_name(), shard.start, shard.end, replicas);
    }

    for node in cluster.nodes() {
        let status = node.status().await;
        tracing::info!(
            "Node {} is {} in term {} with {} log entries ({} applied)",
            status.id,
            status.role,
            status.term,
            status.log_len,
            status.last_applied
        );
    }

    let summary = cluster.summary().await;
    println!();
    println!("Cluster Summary:");
    println!("{}", serde_json::to_string_pretty(&summary)?);

    cluster.shutdown().await
}

/// Initialize configuration file
fn run_init(output: PathBuf) -> Result<()> {
    let config_content = r#"# ShardRaft Configuration
# Generated configuration file

[cluster]
replication_factor = 3
shard_size = 10
max_shards_per_node = 3
initial_node_count = 1

[election]
timeout_min_ms = 1500
timeout_max_ms = 3000
heartbeat_interval_ms = 500
inbox_capacity = 256

[storage]
# Unset keeps every node's store in memory
# data_dir = "/var/lib/shardraft"

[logging]
level = "info"
format = "pretty"
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then run with: shardraft --config {} run", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match ShardRaftConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Replication Factor: {}", config.cluster.replication_factor);
            println!("  Shard Size: {}", config.cluster.shard_size);
            println!("  Write Quorum: {}", config.cluster.write_quorum());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show cluster configuration
fn run_info(config: &ShardRaftConfig) -> Result<()> {
    println!("ShardRaft Cluster Information");
    println!("=============================");
    println!();
    println!("Cluster Configuration:");
    println!("  Replication:    {}", config.cluster.replication_factor);
    println!("  Write Quorum:   {}", config.cluster.write_quorum());
    println!("  Shard Size:     {}", config.cluster.shard_size);
    println!("  Shards/Node:    {}", config.cluster.max_shards_per_node);
    println!("  Initial Nodes:  {}", config.cluster.initial_node_count);
    println!();
    println!("Election Configuration:");
    println!(
        "  Timeout:        {}..={} ms",
        config.election.timeout_min_ms, config.election.timeout_max_ms
    );
    println!("  Heartbeat:      {} ms", config.election.heartbeat_interval_ms);
    println!("  Inbox:          {}", config.election.inbox_capacity);
    println!();
    println!("Storage:");
    match &config.storage.data_dir {
        Some(dir) => println!("  Data Directory: {}", dir.display()),
        None => println!("  Data Directory: (in memory)"),
    }

    Ok(())
}
