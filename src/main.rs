//! Achievement Ledger - operator CLI
//!
//! Audits and repairs achievement/reference consistency against the live
//! stores and prints JSON reports on stdout.

use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use achievement_ledger::{
    config::{Args, Command, NotifierKind},
    db::MongoClient,
    identity::SqliteIdentityStore,
    notify::{LogNotifier, MongoNotifier, Notifier},
    store::MongoStore,
    LifecycleEngine, RepairEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("achievement_ledger={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = args.engine_config();

    let identity = Arc::new(SqliteIdentityStore::open(&args.identity_db)?);
    if let Command::InitIdentity = args.command {
        identity.init_schema()?;
        info!(path = %args.identity_db.display(), "Identity schema ready");
        return Ok(());
    }

    let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db, args.store_timeout_ms).await?;
    info!(database = %mongo.db_name(), "Stores connected");
    let store = Arc::new(MongoStore::new(&mongo).await?);

    match &args.command {
        Command::Audit { student } => {
            let repair = RepairEngine::new(store.clone(), store.clone(), config);
            print_json(&repair.audit(student).await?)?;
        }
        Command::Repair { student } => {
            let repair = RepairEngine::new(store.clone(), store.clone(), config);
            print_json(&repair.repair(student).await?)?;
        }
        Command::Resolve { achievement } => {
            let repair = RepairEngine::new(store.clone(), store.clone(), config);
            print_json(&repair.safe_resolve_reference(achievement).await?)?;
        }
        Command::Pending { lecturer } => {
            let notifier: Arc<dyn Notifier> = match args.notifier {
                NotifierKind::Mongo => Arc::new(MongoNotifier::new(&mongo).await?),
                NotifierKind::Log => Arc::new(LogNotifier),
            };
            let engine = LifecycleEngine::new(identity, store.clone(), store, notifier, config);
            print_json(&engine.pending_verifications(lecturer).await?)?;
        }
        Command::InitIdentity => {}
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
