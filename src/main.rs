//! Coop Content CLI
//!
//! Operates on a local store as a single agent.
//!
//! ## Usage
//!
//! ```bash
//! # Create a group (agent comes from config, or is generated on first run)
//! coop-content create-group --admin uhCAk... --member uhCAk...
//!
//! # Link content and push a new version
//! coop-content link-content <GROUP_ID> <CONTENT>
//! coop-content update-content <GROUP_ID> <CONTENT_ID> <PREV> <NEXT>
//! coop-content latest <GROUP_ID> <CONTENT_ID>
//!
//! # Raw call by function name
//! coop-content call get_group '"uhCEk..."'
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use coop_content::config::default_storage_dir;
use coop_content::{
    Address, Backend, Config, CoopContent, CreateContentLinkInput, CreateContentUpdateLinkInput,
    CreateGroupInput, GetGroupContentInput, GroupAuthAnchorInput, HashKind, MemoryStore,
    SledStore, Store,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "coop-content")]
#[command(about = "Versioned groups and content links over a local hash-linked store")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "COOP_CONTENT_DIR")]
    storage_dir: Option<PathBuf>,

    /// Agent address to act as
    #[arg(long, env = "COOP_CONTENT_AGENT")]
    agent: Option<Address>,

    /// Use an in-memory store (nothing persists past this invocation)
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a freshly generated agent address
    NewAgent,
    #[command(flatten)]
    Store(StoreCommand),
}

/// Subcommands that open the store
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Create a group
    CreateGroup {
        #[arg(long)]
        admin: Address,
        #[arg(long = "member")]
        members: Vec<Address>,
    },
    /// Replace the member list of a group revision
    UpdateGroup {
        base: Address,
        #[arg(long = "member")]
        members: Vec<Address>,
    },
    /// Show the latest revision of a group
    GetGroup { group_id: Address },
    /// List every revision of a group
    History { group_id: Address },
    /// List groups created by this agent
    MyGroups,
    /// Link the first version of a content item to a group
    LinkContent { group_id: Address, target: Address },
    /// Record a new version of a content item
    UpdateContent {
        group_id: Address,
        content_id: Address,
        prev: Address,
        next: Address,
    },
    /// Resolve the latest version of a content item
    Latest { group_id: Address, content_id: Address },
    /// List every version of a content item
    ContentHistory { group_id: Address, content_id: Address },
    /// Latest versions of all content in a group
    Targets { group_id: Address },
    /// Derive an authorization anchor
    Anchor {
        group_id: Address,
        author: Address,
        /// Derive the archive anchor instead of the active one
        #[arg(long)]
        archive: bool,
    },
    /// Invoke a function by name with a JSON payload
    Call { function: String, payload: String },
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run<S: Store>(coop: CoopContent<S>, command: StoreCommand) -> anyhow::Result<()> {
    match command {
        StoreCommand::CreateGroup { admin, members } => print(&coop.create_group(CreateGroupInput {
            members,
            admin,
            metadata: Default::default(),
        })?),
        StoreCommand::UpdateGroup { base, members } => {
            let mut entry = coop.get_group(&base)?;
            entry.members = members;
            print(&coop.update_group(&base, entry)?)
        }
        StoreCommand::GetGroup { group_id } => print(&coop.get_group(&group_id)?),
        StoreCommand::History { group_id } => print(&coop.get_group_history(&group_id)?),
        StoreCommand::MyGroups => print(&coop.get_my_groups()?),
        StoreCommand::LinkContent { group_id, target } => {
            print(&coop.create_content_link(CreateContentLinkInput {
                group_id,
                content_target: target,
            })?)
        }
        StoreCommand::UpdateContent {
            group_id,
            content_id,
            prev,
            next,
        } => print(&coop.create_content_update_link(CreateContentUpdateLinkInput {
            group_id,
            content_id,
            content_prev: prev,
            content_next: next,
        })?),
        StoreCommand::Latest { group_id, content_id } => print(
            &coop.get_group_content_latest(GetGroupContentInput { group_id, content_id })?,
        ),
        StoreCommand::ContentHistory { group_id, content_id } => print(
            &coop.get_group_content_history(GetGroupContentInput { group_id, content_id })?,
        ),
        StoreCommand::Targets { group_id } => print(&coop.get_group_content_targets(&group_id)?),
        StoreCommand::Anchor {
            group_id,
            author,
            archive,
        } => {
            let input = GroupAuthAnchorInput { group_id, author };
            if archive {
                print(&coop.group_auth_archive_anchor_hash(&input))
            } else {
                print(&coop.group_auth_anchor_hash(&input))
            }
        }
        StoreCommand::Call { function, payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            print(&coop.call(&function, &payload)?)
        }
    }
}

fn new_agent() -> Address {
    Address::hash_bytes(HashKind::Agent, uuid::Uuid::new_v4().as_bytes())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("coop_content=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let command = match args.command {
        Command::NewAgent => return print(&new_agent()),
        Command::Store(command) => command,
    };

    // Load config: explicit path, else the one saved in the storage directory
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        let storage_dir = args.storage_dir.clone().unwrap_or_else(default_storage_dir);
        let saved = storage_dir.join("config.toml");
        if saved.exists() {
            Config::load(&saved)?
        } else {
            Config::default()
        }
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if args.memory {
        config.backend = Backend::Memory;
    }
    if args.agent.is_some() {
        config.agent = args.agent;
    }

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating {}", config.storage_dir.display()))?;

    let agent = match config.agent.clone() {
        Some(agent) => agent,
        None => {
            let agent = new_agent();
            warn!(agent = %agent, "No agent configured; generated a new one");
            config.agent = Some(agent.clone());
            let config_path = config.config_path();
            config.save(&config_path)?;
            info!(path = %config_path.display(), "Saved config with new agent");
            agent
        }
    };

    info!(
        storage_dir = %config.storage_dir.display(),
        backend = ?config.backend,
        agent = %agent,
        "Starting coop-content"
    );

    match config.backend {
        Backend::Memory => {
            let coop = CoopContent::new(Arc::new(MemoryStore::new()), agent);
            run(coop, command)
        }
        Backend::Sled => {
            let store = Arc::new(SledStore::open_with_cache(config.db_path(), config.sled_cache_bytes)?);
            let coop = CoopContent::new(Arc::clone(&store), agent);
            let result = run(coop, command);
            store.flush()?;
            result
        }
    }
}
