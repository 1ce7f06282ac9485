/// Command-line entry point for fund value synchronization
///
///   fundsync init          create the database schema
///   fundsync               refresh the instrument list
///   fundsync ID [ID ...]   synchronize each instrument and print a JSON summary
use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::json;
use tracing::{error, info};

use fundsync::{
    config::load_config,
    data::{InstrumentDirectory, InstrumentService, PersistenceWriter, SyncCoordinator},
    source::{HttpSourceClient, SourceClient},
    storage::SqliteStore,
    utils::init_tracing,
    SyncConfig,
};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

struct FundSyncApp {
    config: SyncConfig,
    source: Arc<dyn SourceClient>,
    store: Arc<SqliteStore>,
}

impl FundSyncApp {
    async fn new(config: SyncConfig) -> anyhow::Result<Self> {
        let source = HttpSourceClient::new(&config.base_url, config.request_timeout())
            .context("Failed to create upstream client")?;
        let store = SqliteStore::connect(&config.database_path)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_path))?;

        Ok(Self {
            config,
            source: Arc::new(source),
            store: Arc::new(store),
        })
    }

    fn directory(&self) -> Arc<InstrumentDirectory> {
        Arc::new(InstrumentDirectory::new(
            Arc::clone(&self.source),
            self.store.clone(),
        ))
    }

    async fn refresh_list(&self) -> anyhow::Result<()> {
        let instruments = self.directory().refresh().await?;
        println!("{}", json!({ "instruments": instruments.len() }));
        Ok(())
    }

    async fn sync_all(&self, ids: &[String]) -> anyhow::Result<()> {
        let writer = PersistenceWriter::spawn(self.store.clone());
        let service = InstrumentService::new(
            self.directory(),
            SyncCoordinator::with_config(
                &self.config,
                Arc::clone(&self.source),
                self.store.clone(),
                writer.queue(),
            ),
        );

        let mut failed = Vec::new();
        for id in ids {
            match service.history_with_outcome(id).await {
                Ok((history, outcome)) => {
                    let summary = json!({
                        "id": history.info.id,
                        "name": history.info.name,
                        "category": history.info.category,
                        "resume_date": outcome.window.resume_date,
                        "values": history.values.len(),
                        "new_values": outcome.fetched,
                        "up_to_date": outcome.up_to_date,
                        "last": history.values.last(),
                    });
                    println!("{}", summary);
                }
                Err(e) => {
                    error!("{}: {} ({})", id, e, e.error_code());
                    println!("{}", json!({ "id": id, "error": e.to_string(), "code": e.error_code() }));
                    failed.push(id.clone());
                }
            }
        }

        // Release the coordinator's queue so the writer can drain
        drop(service);
        let stats = writer.shutdown().await?;
        info!(
            "Writer finished: {} batches, {} rows, {} failed",
            stats.batches_written, stats.rows_written, stats.batches_failed
        );

        if !failed.is_empty() {
            bail!("{} of {} instruments failed: {}", failed.len(), ids.len(), failed.join(", "));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;
    init_tracing(config.log_json);

    info!("Starting fundsync (config: {})", config_path);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let app = FundSyncApp::new(config).await?;

    let result = match args.first().map(String::as_str) {
        Some("init") => {
            // Schema is created on connect
            info!("✅ Database schema ready at {}", app.config.database_path);
            Ok(())
        }
        None => app.refresh_list().await,
        Some(_) => app.sync_all(&args).await,
    };

    app.store.close().await;
    result
}
