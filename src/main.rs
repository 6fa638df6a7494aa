use std::sync::Arc;
use tracing::info;

mod bus;
mod chat;
mod config;
mod conversations;
mod entity;
mod interface;
mod marketplace;
mod post;
mod search;
mod store;

use config::{Config, StorageKind};
use conversations::ConversationStore;
use marketplace::Marketplace;
use post::PostStore;
use store::{KeyValueStore, MemoryKv, SqliteKv};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("CubeOffers starting...");

    let config = Config::from_env()?;

    match config.storage {
        StorageKind::Sqlite => {
            info!("Initializing store at {}", config.db_path.display());
            let kv = SqliteKv::new(&config.db_path).await?;
            kv.init().await?;
            run(config, kv).await
        }
        StorageKind::Memory => {
            info!("Using in-memory store; conversations will not survive a restart");
            run(config, MemoryKv::new()).await
        }
    }
}

async fn run<S: KeyValueStore>(config: Config, kv: S) -> anyhow::Result<()> {
    let posts = if config.seed_posts {
        PostStore::seeded()?
    } else {
        PostStore::default()
    };
    info!("Loaded {} posts", posts.len());

    let bus = Arc::new(bus::EventBus::new());
    let conversations = ConversationStore::new(kv, config.key_scheme);
    info!("Conversation keys: {:?}", conversations.scheme());

    let marketplace = Marketplace::new(posts, config.viewer, conversations, bus.clone());

    interface::console::ConsoleInterface::new(marketplace, bus)
        .run()
        .await
}
