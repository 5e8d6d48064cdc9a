use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use crate::services::ingest_service::DEFAULT_COLLECTION;
use std::{env, path::PathBuf};

/// Which services back object reads and record writes.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Cloud Storage + Firestore.
    Gcp,
    /// Directory-backed buckets + SQLite.
    Local,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub scratch_dir: PathBuf,
    pub backend: Backend,
    pub project_id: Option<String>,
    pub collection: String,
    pub database_id: String,
    pub storage_endpoint: String,
    pub vision_endpoint: String,
    pub firestore_endpoint: String,
    pub access_token: Option<String>,
    pub vision_api_key: Option<String>,
    pub max_labels: Option<u32>,
    pub local_storage_dir: PathBuf,
    pub database_url: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Labels images uploaded to a storage bucket")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_LABELER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_LABELER_PORT / PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory objects are downloaded into (overrides IMAGE_LABELER_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Storage and database backend (overrides IMAGE_LABELER_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Google Cloud project owning the Firestore database (overrides IMAGE_LABELER_PROJECT_ID)
    #[arg(long)]
    pub project_id: Option<String>,

    /// Collection image records are written to (overrides IMAGE_LABELER_COLLECTION)
    #[arg(long)]
    pub collection: Option<String>,

    /// Firestore database id (overrides IMAGE_LABELER_DATABASE_ID)
    #[arg(long)]
    pub database_id: Option<String>,

    /// Cloud Storage API base URL (overrides IMAGE_LABELER_STORAGE_ENDPOINT)
    #[arg(long)]
    pub storage_endpoint: Option<String>,

    /// Cloud Vision API base URL (overrides IMAGE_LABELER_VISION_ENDPOINT)
    #[arg(long)]
    pub vision_endpoint: Option<String>,

    /// Firestore API base URL (overrides IMAGE_LABELER_FIRESTORE_ENDPOINT)
    #[arg(long)]
    pub firestore_endpoint: Option<String>,

    /// Static OAuth access token (overrides IMAGE_LABELER_ACCESS_TOKEN)
    #[arg(long)]
    pub access_token: Option<String>,

    /// Cloud Vision API key (overrides IMAGE_LABELER_VISION_API_KEY)
    #[arg(long)]
    pub vision_api_key: Option<String>,

    /// Maximum labels requested per image (overrides IMAGE_LABELER_MAX_LABELS)
    #[arg(long)]
    pub max_labels: Option<u32>,

    /// Bucket root for the local backend (overrides IMAGE_LABELER_LOCAL_STORAGE_DIR)
    #[arg(long)]
    pub local_storage_dir: Option<PathBuf>,

    /// SQLite URL for the local backend (overrides IMAGE_LABELER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables `lookup` returns, over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_port = match lookup("IMAGE_LABELER_PORT").or_else(|| lookup("PORT")) {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing port value `{}`", value))?,
            None => 8080,
        };
        let env_backend = match lookup("IMAGE_LABELER_BACKEND") {
            Some(value) => <Backend as ValueEnum>::from_str(&value, true).map_err(|err| {
                anyhow!("parsing IMAGE_LABELER_BACKEND value `{}`: {}", value, err)
            })?,
            None => Backend::Gcp,
        };
        let env_max_labels = lookup("IMAGE_LABELER_MAX_LABELS")
            .map(|value| {
                value
                    .parse::<u32>()
                    .with_context(|| format!("parsing IMAGE_LABELER_MAX_LABELS value `{}`", value))
            })
            .transpose()?;

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("IMAGE_LABELER_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            scratch_dir: args
                .scratch_dir
                .or_else(|| lookup("IMAGE_LABELER_SCRATCH_DIR").map(PathBuf::from))
                .unwrap_or_else(env::temp_dir),
            backend: args.backend.unwrap_or(env_backend),
            project_id: args
                .project_id
                .or_else(|| lookup("IMAGE_LABELER_PROJECT_ID"))
                .or_else(|| lookup("GOOGLE_CLOUD_PROJECT")),
            collection: args
                .collection
                .or_else(|| lookup("IMAGE_LABELER_COLLECTION"))
                .unwrap_or_else(|| DEFAULT_COLLECTION.into()),
            database_id: args
                .database_id
                .or_else(|| lookup("IMAGE_LABELER_DATABASE_ID"))
                .unwrap_or_else(|| "(default)".into()),
            storage_endpoint: args
                .storage_endpoint
                .or_else(|| lookup("IMAGE_LABELER_STORAGE_ENDPOINT"))
                .unwrap_or_else(|| "https://storage.googleapis.com".into()),
            vision_endpoint: args
                .vision_endpoint
                .or_else(|| lookup("IMAGE_LABELER_VISION_ENDPOINT"))
                .unwrap_or_else(|| "https://vision.googleapis.com".into()),
            firestore_endpoint: args
                .firestore_endpoint
                .or_else(|| lookup("IMAGE_LABELER_FIRESTORE_ENDPOINT"))
                .unwrap_or_else(|| "https://firestore.googleapis.com".into()),
            access_token: args
                .access_token
                .or_else(|| lookup("IMAGE_LABELER_ACCESS_TOKEN")),
            vision_api_key: args
                .vision_api_key
                .or_else(|| lookup("IMAGE_LABELER_VISION_API_KEY")),
            max_labels: args.max_labels.or(env_max_labels),
            local_storage_dir: args
                .local_storage_dir
                .or_else(|| lookup("IMAGE_LABELER_LOCAL_STORAGE_DIR").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./data/objects")),
            database_url: args
                .database_url
                .or_else(|| lookup("IMAGE_LABELER_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/image_labeler.db".into()),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
