//! chainview CLI — inspect and manage event database state.
//!
//! Usage:
//! ```bash
//! chainview stats  ./events.db
//! chainview events ./events.db 120
//! chainview reset  ./events.db
//! chainview info
//! ```

use std::env;
use std::process;

use anyhow::Context;

use chainview_core::{DbSettings, SettingValue};
use chainview_storage::EventDb;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "stats" => cmd_stats(arg(&args, 2, "database path")?).await?,
        "events" => {
            let path = arg(&args, 2, "database path")?;
            let block: i64 = arg(&args, 3, "block number")?
                .parse()
                .context("block number must be an integer")?;
            cmd_events(path, block).await?;
        }
        "setting" => cmd_setting(arg(&args, 2, "setting name")?)?,
        "reset" => cmd_reset(arg(&args, 2, "database path")?).await?,
        "version" | "--version" | "-V" => {
            println!("chainview {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
    Ok(())
}

fn arg<'a>(args: &'a [String], n: usize, what: &str) -> anyhow::Result<&'a str> {
    args.get(n)
        .map(String::as_str)
        .with_context(|| format!("missing argument: {what}"))
}

fn print_usage() {
    println!("chainview {}", env!("CARGO_PKG_VERSION"));
    println!("Event database — indexing and incremental aggregation\n");
    println!("USAGE:");
    println!("    chainview <COMMAND> [ARGS]\n");
    println!("COMMANDS:");
    println!("    stats <db>            Print the global snapshot");
    println!("    events <db> <block>   List the stored events of one block");
    println!("    setting <name>        Print one engine setting (defaults)");
    println!("    reset <db>            Drop every table (destructive)");
    println!("    info                  Show engine configuration defaults");
    println!("    version               Print version");
    println!("    help                  Print this help");
}

fn cmd_info() {
    let s = DbSettings::default();
    println!("Chainview v{}", env!("CARGO_PKG_VERSION"));
    println!("  Aggregate period: {} buckets", s.aggregate_period);
    println!("  Aggregation page limit: {} providers/page", s.page_limit);
    println!("  Provider kinds: blobber, validator, miner, sharder, authorizer");
    println!("  Storage backend: SQLite (WAL)");
}

async fn cmd_stats(path: &str) -> anyhow::Result<()> {
    let db = EventDb::open(path, DbSettings::default())
        .await
        .context("opening database")?;
    let gs = db.global_snapshot().await?;
    let events = db.event_count().await?;

    println!("Global snapshot (round {}):", gs.round);
    println!("  total_staked     {}", gs.total_staked);
    println!("  total_rewards    {}", gs.total_rewards);
    println!("  total_mint       {}", gs.total_mint);
    println!("  total_burn       {}", gs.total_burn);
    println!("  blobbers         {}", gs.blobber_count);
    println!("  validators       {}", gs.validator_count);
    println!("  miners           {}", gs.miner_count);
    println!("  sharders         {}", gs.sharder_count);
    println!("  authorizers      {}", gs.authorizer_count);
    println!("Stored events: {events}");
    db.close().await;
    Ok(())
}

async fn cmd_events(path: &str, block: i64) -> anyhow::Result<()> {
    let db = EventDb::open(path, DbSettings::default())
        .await
        .context("opening database")?;
    let events = db.get_events(block).await?;
    if events.is_empty() {
        println!("No events stored for block {block}");
    }
    for e in events {
        println!(
            "block={} tx={} tag={} index={}",
            e.block_number, e.tx_hash, e.tag, e.index
        );
    }
    db.close().await;
    Ok(())
}

fn cmd_setting(name: &str) -> anyhow::Result<()> {
    match DbSettings::default().get(name)? {
        SettingValue::Int(v) => println!("{name} = {v}"),
        SettingValue::Bool(v) => println!("{name} = {v}"),
    }
    Ok(())
}

async fn cmd_reset(path: &str) -> anyhow::Result<()> {
    let db = EventDb::open(path, DbSettings::default())
        .await
        .context("opening database")?;
    db.drop_tables().await?;
    println!("All tables dropped: {path}");
    db.close().await;
    Ok(())
}
