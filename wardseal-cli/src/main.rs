//! `WardSeal` CLI tool for root keys, blind index tokens and index maintenance.

#![warn(clippy::pedantic, clippy::nursery)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use wardseal::cipher::{CipherMode, FieldCipher};
use wardseal::config::{EnvKeyProvider, ROOT_KEY_ENV};
use wardseal::key_provider::KeyProvider;
use wardseal::mapper::RecordMapper;
use wardseal::repository::EncryptedRepository;
use wardseal::schema::SchemaRegistry;
use wardseal::store::SqliteStore;
use wardseal_key_file::{generate_key_hex, FileKeyProvider};

#[derive(Parser)]
#[command(name = "wardseal")]
#[command(about = "WardSeal field encryption CLI", long_about = None)]
struct Cli {
    /// Read the root key from this file instead of WARDSEAL_ROOT_KEY
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// Cipher used for new envelopes
    #[arg(long, global = true, value_enum, default_value_t = Algorithm::Chacha20)]
    algorithm: Algorithm,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new random root key
    Keygen {
        /// Write the key to this file (hex, 0600) instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Encoding of the printed key
        #[arg(long, value_enum, default_value_t = KeyFormat::Hex, conflicts_with = "output")]
        format: KeyFormat,
    },
    /// Print the blind index token of a value
    Index {
        /// Schema JSON file
        #[arg(long)]
        schema: PathBuf,
        /// Entity type, e.g. Patient
        #[arg(long)]
        entity: String,
        /// Indexed field name
        #[arg(long)]
        field: String,
        /// Plaintext value
        #[arg(long)]
        value: String,
    },
    /// Encrypt a single field value into envelope text
    Encrypt {
        #[arg(long)]
        entity: String,
        #[arg(long)]
        field: String,
        #[arg(long)]
        value: String,
    },
    /// Decrypt envelope text of a single field
    Decrypt {
        #[arg(long)]
        entity: String,
        #[arg(long)]
        field: String,
        #[arg(long)]
        envelope: String,
    },
    /// Check a SQLite database's blind index against its records
    Verify {
        /// Schema JSON file
        #[arg(long)]
        schema: PathBuf,
        /// SQLite database file
        #[arg(long)]
        db: PathBuf,
        /// Entity type to check
        #[arg(long)]
        entity: String,
        /// Delete orphaned entries before checking
        #[arg(long)]
        prune: bool,
        /// Recompute every entry before checking
        #[arg(long)]
        reindex: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyFormat {
    Hex,
    Base64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Algorithm {
    Chacha20,
    Xchacha20,
}

impl From<Algorithm> for CipherMode {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Chacha20 => Self::ChaCha20Poly1305,
            Algorithm::Xchacha20 => Self::XChaCha20Poly1305,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cipher = FieldCipher::new(cli.algorithm.into());

    match cli.command {
        Commands::Keygen { output: Some(path), .. } => {
            FileKeyProvider::init(&path)
                .with_context(|| format!("failed to create key file {}", path.display()))?;
            eprintln!("Root key written to {}", path.display());
        }
        Commands::Keygen { output: None, format } => {
            let key = generate_key_hex();
            match format {
                KeyFormat::Hex => println!("{}", key.as_str()),
                KeyFormat::Base64 => {
                    let bytes = hex::decode(key.as_str()).context("generated key is not hex")?;
                    let text = base64::engine::general_purpose::STANDARD.encode(bytes);
                    println!("base64:{text}");
                }
            }
        }
        Commands::Index { schema, entity, field, value } => {
            let mapper = build_mapper(cli.key_file.as_deref(), Some(&schema), cipher)?;
            let token = mapper.index_token(&entity, &field, &value)?;
            println!("{token}");
        }
        Commands::Encrypt { entity, field, value } => {
            let mapper = build_mapper(cli.key_file.as_deref(), None, cipher)?;
            println!("{}", mapper.encrypt_field(&entity, &field, &value)?);
        }
        Commands::Decrypt { entity, field, envelope } => {
            let mapper = build_mapper(cli.key_file.as_deref(), None, cipher)?;
            println!("{}", mapper.decrypt_field(&entity, &field, &envelope)?);
        }
        Commands::Verify { schema, db, entity, prune, reindex } => {
            let mapper = build_mapper(cli.key_file.as_deref(), Some(&schema), cipher)?;
            let store = SqliteStore::open(&db)
                .with_context(|| format!("failed to open database {}", db.display()))?;
            let repo = EncryptedRepository::new(mapper, store);

            if prune {
                let pruned = repo.prune_orphans(&entity)?;
                tracing::info!(entity = %entity, pruned, "prune finished");
                println!("Pruned {pruned} orphaned entries");
            }
            if reindex {
                let reindexed = repo.reindex(&entity)?;
                tracing::info!(entity = %entity, reindexed, "reindex finished");
                println!("Reindexed {reindexed} records");
            }

            let report = repo.verify_index(&entity)?;
            println!(
                "{}: {} records, {} orphaned, {} stale, {} missing",
                report.entity_type,
                report.records_checked,
                report.orphaned.len(),
                report.stale.len(),
                report.missing.len()
            );
            report.into_result()?;
        }
    }

    Ok(())
}

fn build_mapper(
    key_file: Option<&Path>,
    schema: Option<&Path>,
    cipher: FieldCipher,
) -> Result<RecordMapper> {
    let provider: Box<dyn KeyProvider> = match key_file {
        Some(path) => Box::new(FileKeyProvider::new(path)?),
        None => Box::new(EnvKeyProvider::new()),
    };

    let registry = match schema {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read schema {}", path.display()))?;
            SchemaRegistry::from_json(&json)
                .with_context(|| format!("invalid schema {}", path.display()))?
        }
        None => SchemaRegistry::new(),
    };

    RecordMapper::from_provider(provider.as_ref(), Arc::new(registry), cipher).with_context(|| {
        if key_file.is_some() {
            "failed to load root key file".to_string()
        } else {
            format!("failed to load root key; set {ROOT_KEY_ENV} or pass --key-file")
        }
    })
}
