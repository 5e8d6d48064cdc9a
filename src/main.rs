use anyhow::{Context, Result};
use axum::Router;
use reqwest::{Client, Url};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, Backend};
use services::{
    credentials::TokenSource,
    document_store::{DocumentStore, FirestoreClient, SqliteDocumentStore, apply_migration},
    ingest_service::IngestService,
    label_detector::CloudVisionClient,
    object_store::{GcsObjectStore, LocalObjectStore, ObjectStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting image-labeler on {} (backend {:?}, collection `{}`)",
        cfg.addr(),
        cfg.backend,
        cfg.collection
    );

    // --- Handle migration mode ---
    if migrate {
        let db = connect_sqlite(&cfg.database_url).await?;
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Ensure scratch directory exists ---
    if !cfg.scratch_dir.exists() {
        fs::create_dir_all(&cfg.scratch_dir)?;
        tracing::info!("Created scratch directory at {}", cfg.scratch_dir.display());
    }

    // --- Initialize core service ---
    let ingest = build_ingest_service(&cfg).await?;

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(ingest);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wire the pipeline's collaborators for the configured backend.
///
/// One HTTP client and one token source are shared by every Google API client.
async fn build_ingest_service(cfg: &AppConfig) -> Result<IngestService> {
    let http = Client::builder()
        .user_agent(concat!("image-labeler/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    let tokens = Arc::new(match (&cfg.access_token, cfg.backend) {
        (Some(token), _) => TokenSource::Static(token.clone()),
        (None, Backend::Gcp) => TokenSource::metadata_server(http.clone()),
        (None, Backend::Local) => TokenSource::Anonymous,
    });

    let labels = Arc::new(
        CloudVisionClient::new(http.clone(), cfg.vision_endpoint.clone(), tokens.clone())
            .with_api_key(cfg.vision_api_key.clone())
            .with_max_results(cfg.max_labels),
    );

    let (objects, documents): (Arc<dyn ObjectStore>, Arc<dyn DocumentStore>) = match cfg.backend
    {
        Backend::Gcp => {
            let project_id = cfg
                .project_id
                .clone()
                .context("the gcp backend needs a project id (--project-id or GOOGLE_CLOUD_PROJECT)")?;
            let storage_endpoint = Url::parse(&cfg.storage_endpoint)
                .with_context(|| format!("parsing storage endpoint `{}`", cfg.storage_endpoint))?;
            let firestore_endpoint = Url::parse(&cfg.firestore_endpoint).with_context(|| {
                format!("parsing firestore endpoint `{}`", cfg.firestore_endpoint)
            })?;
            let objects: Arc<dyn ObjectStore> = Arc::new(GcsObjectStore::new(
                http.clone(),
                storage_endpoint,
                tokens.clone(),
            ));
            let documents: Arc<dyn DocumentStore> = Arc::new(FirestoreClient::new(
                http.clone(),
                firestore_endpoint,
                project_id,
                cfg.database_id.clone(),
                tokens.clone(),
            ));
            (objects, documents)
        }
        Backend::Local => {
            let db = Arc::new(connect_sqlite(&cfg.database_url).await?);
            tracing::info!(
                "Serving buckets from {}",
                cfg.local_storage_dir.display()
            );
            let objects: Arc<dyn ObjectStore> =
                Arc::new(LocalObjectStore::new(cfg.local_storage_dir.clone()));
            let documents: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db));
            (objects, documents)
        }
    };

    Ok(IngestService::new(
        objects,
        labels,
        documents,
        cfg.scratch_dir.clone(),
        cfg.collection.clone(),
    ))
}

/// Open the SQLite database, creating its file and parent directory if needed.
async fn connect_sqlite(db_url: &str) -> Result<SqlitePool> {
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);

    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?)
}

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let count = apply_migration(db, &sql).await?;
    tracing::info!("Ran {} migration statements", count);

    Ok(())
}
