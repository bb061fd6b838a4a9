mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailk_schemas::{RecordKey, SKIP_CANCEL_ANNOTATION};
use tracing::info;

use commands::validate;

#[derive(Parser)]
#[command(name = "mailk")]
#[command(about = "MailRequest controller operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and validate MailRequest manifests without contacting the provider
    Validate {
        /// Manifest files (YAML, multi-document allowed)
        #[arg(required = true)]
        manifests: Vec<String>,

        /// Layered config paths supplying /gateway/services (defaults to the
        /// provider's known services)
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env overlay -> ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Let a record be released on deletion even when its order cannot be
    /// cancelled
    Override {
        namespace: String,
        name: String,

        /// Clear the override instead of setting it
        #[arg(long, default_value_t = false)]
        off: bool,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Validate {
            manifests,
            config_paths,
        } => {
            let catalog = commands::load_catalog(&config_paths)?;
            let mut invalid = 0usize;
            let mut checked = 0usize;
            for path in &manifests {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read manifest: {path}"))?;
                let docs = validate::parse_manifests(&raw)
                    .with_context(|| format!("failed to parse manifest: {path}"))?;
                for doc in &docs {
                    let verdict = validate::check(doc, &catalog);
                    if !verdict.is_ok() {
                        invalid += 1;
                    }
                    checked += 1;
                    print!("{}", validate::render(&verdict));
                }
            }
            if invalid > 0 {
                anyhow::bail!("VALIDATION_FAILED: {invalid} of {checked} manifest(s) invalid");
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mailk_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Db { cmd } => {
            let pool = mailk_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mailk_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_mail_requests_table={} records={}",
                        s.ok, s.has_mail_requests_table, s.records
                    );
                }
                DbCmd::Migrate => {
                    mailk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Override {
            namespace,
            name,
            off,
        } => {
            let pool = mailk_db::connect_from_env().await?;
            let key = RecordKey::new(namespace, name);
            let value = commands::override_value(off);
            let found =
                mailk_db::set_annotation(&pool, &key, SKIP_CANCEL_ANNOTATION, value).await?;
            if !found {
                anyhow::bail!("NOT_FOUND: no MailRequest {key}");
            }
            info!(record = %key, set = value.is_some(), "deletion override written");
            println!("record={key} override={}", value.is_some());
        }
    }

    Ok(())
}
