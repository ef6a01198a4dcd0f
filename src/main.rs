use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod attendance;
mod config;
mod db;
mod directory;
mod docs;
mod error;
mod model;
mod routes;
mod store;

use crate::attendance::AttendanceService;
use crate::config::{Config, StorageBackend};
use crate::db::init_db;
use crate::directory::{TagDirectory, memory::InMemoryDirectory, mysql::MySqlDirectory};
use crate::docs::ApiDoc;
use crate::store::{AttendanceStore, memory::InMemoryStore, mysql::MySqlStore};

#[get("/")]
async fn index() -> impl Responder {
    "RFID attendance service is running"
}

async fn backends(
    config: &Config,
) -> anyhow::Result<(Arc<dyn TagDirectory>, Arc<dyn AttendanceStore>)> {
    match config.storage_backend {
        StorageBackend::MySql => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            let pool = init_db(url, config.policy().upstream_timeout).await?;
            Ok((
                Arc::new(MySqlDirectory::new(pool.clone(), config.directory_cache_ttl())),
                Arc::new(MySqlStore::new(pool)),
            ))
        }
        StorageBackend::Memory => {
            let directory = match &config.tag_directory_file {
                Some(path) => InMemoryDirectory::load_json(path)?,
                None => {
                    warn!("TAG_DIRECTORY_FILE not set; no tag or block is registered");
                    InMemoryDirectory::default()
                }
            };
            if directory.block_count() == 0 {
                warn!("Tag directory registers no blocks; every scan will be rejected");
            }
            warn!("In-memory storage: the ledger is lost on restart");
            Ok((Arc::new(directory), Arc::new(InMemoryStore::new())))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "attendance.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(backend = ?config.storage_backend, "Server starting...");

    let (directory, store) = backends(&config).await?;
    let service = Data::new(AttendanceService::new(config.policy(), directory, store));

    // Nothing is being ingested yet, so this recompute cannot be skipped.
    service
        .reconcile()
        .await
        .context("Failed to warm occupancy from the ledger")?;

    let reconciler = service.clone();
    let every = config.reconcile_interval();
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // first tick is immediate; warmup already ran
        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.reconcile().await {
                error!(error = %e, "Occupancy reconcile failed");
            }
        }
    });

    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                // wildcard {_:.*} so the JS/CSS assets match too
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(service.clone())
            .service(index)
            .configure(|cfg| routes::configure(cfg, config.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
