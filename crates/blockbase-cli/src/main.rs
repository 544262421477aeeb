//! blockbase admin binary.
//!
//! Opens a store from a RON config file (or `BLOCKBASE_*` environment
//! variables), brings it up to date and prints what was asked for as JSON.
//!
//! ```bash
//! blockbase --config store.ron migrate
//! blockbase get c0192f...
//! blockbase history c0192f... --limit 10 --desc
//! blockbase subtree board1 c0192f... --depth 1
//! blockbase activity --board board1 --board board2 --since 1700000000000
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `info` filter.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use blockbase_store::{ActivityQuery, HistoryQuery, SqlStore, StoreConfig};
use blockbase_types::{Block, Board, SubtreeDepth};

#[derive(Parser, Debug)]
#[command(name = "blockbase")]
#[command(about = "Inspect and migrate a blockbase store")]
struct Args {
    /// RON config file; BLOCKBASE_* environment variables are used without it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema steps and data migrations
    Migrate,
    /// Print a live block
    Get { id: String },
    /// Print a board and its live blocks
    Board { board_id: String },
    /// Print the history of a block
    History {
        id: String,
        /// Maximum entries (0 for all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Newest first
        #[arg(long)]
        desc: bool,
    },
    /// Print a block with its children (depth 1) or grandchildren (depth 2)
    Subtree {
        board_id: String,
        block_id: String,
        #[arg(long, default_value_t = 2)]
        depth: u8,
    },
    /// Print the most active boards
    Activity {
        /// Restrict to boards of this team
        #[arg(long)]
        team: Option<String>,
        /// Restrict to these boards (repeatable)
        #[arg(long = "board")]
        boards: Vec<String>,
        /// Only count changes after this time (Unix ms)
        #[arg(long, default_value_t = 0)]
        since: i64,
        /// Only boards this user created or changed
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print every system setting
    Settings,
}

#[derive(Serialize)]
struct BoardView {
    board: Option<Board>,
    blocks: Vec<Block>,
}

fn load_config(path: Option<&PathBuf>) -> Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => StoreConfig::from_env().context("invalid BLOCKBASE_* environment"),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    info!("opening {} store at {}", config.db_type, config.db_config);

    // opening migrates; `migrate` opens bare so its report shows the work
    let store = match args.command {
        Command::Migrate => SqlStore::builder(config).without_migrations().open()?,
        _ => SqlStore::open(config)?,
    };
    execute(&store, args.command)
}

fn execute(store: &SqlStore, command: Command) -> Result<()> {
    match command {
        Command::Migrate => print_json(&store.migrate()?),
        Command::Get { id } => {
            let block = store
                .get_block(&id)?
                .with_context(|| format!("block {id} not found"))?;
            print_json(&block)
        }
        Command::Board { board_id } => print_json(&BoardView {
            board: store.get_board(&board_id)?,
            blocks: store.get_blocks_for_board(&board_id)?,
        }),
        Command::History { id, limit, desc } => {
            let mut query = HistoryQuery::all().with_limit(limit);
            if desc {
                query = query.newest_first();
            }
            print_json(&store.get_block_history(&id, &query)?)
        }
        Command::Subtree {
            board_id,
            block_id,
            depth,
        } => {
            let depth = SubtreeDepth::try_from(depth)?;
            print_json(&store.get_subtree(&board_id, &block_id, depth)?)
        }
        Command::Activity {
            team,
            boards,
            since,
            user,
            limit,
        } => {
            let mut query = ActivityQuery::since(since).paged(0, limit);
            if let Some(team) = team {
                query = query.for_team(team);
            }
            if !boards.is_empty() {
                query = query.for_boards(boards);
            }
            if let Some(user) = user {
                query = query.for_user(user);
            }
            print_json(&store.get_board_activity(&query)?)
        }
        Command::Settings => print_json(&store.get_system_settings()?),
    }
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    run(Args::parse())
}
