use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{Map, json};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use concrete::auth::TokenGenerator;
use concrete::config::Settings;
use concrete::datamodel::{self, DatamodelError, Registry};
use concrete::server::{AppState, create_router};
use concrete::store::{SqliteStore, Store};
use concrete::types::{Level, User, normalize_email};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Parser)]
#[command(name = "concrete")]
#[command(about = "A datamodel-driven datastore", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Compile a datamodel and print its entities
    Check {
        /// Datamodel document (JSON or YAML)
        path: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start the server
    Serve {
        /// Settings file (TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the database and create the first superuser
    Init {
        /// Settings file (TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        password: Option<String>,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },
}

/// Boot-time datamodel failures are fatal.
fn compile_or_exit(path: &Path) -> Registry {
    match datamodel::load_and_compile(path) {
        Ok(registry) => registry,
        Err(e) => {
            error!(code = e.code(), path = %path.display(), "{e}");
            std::process::exit(1);
        }
    }
}

fn run_check(path: &Path, as_json: bool) -> Result<(), DatamodelError> {
    let registry = datamodel::load_and_compile(path)?;

    if as_json {
        let entities: Vec<_> = registry
            .entities()
            .map(|e| {
                json!({
                    "name": e.name,
                    "uid": e.uid,
                    "kind": e.kind,
                    "scoped": e.is_scoped(),
                    "fields": e.fields.len(),
                })
            })
            .collect();
        let summary = json!({
            "version": registry.version().as_str(),
            "divider": registry.divider_name(),
            "entities": entities,
            "fingerprint": registry.fingerprint(),
        });
        println!("{summary:#}");
        return Ok(());
    }

    println!("version:     {}", registry.version().as_str());
    println!("divider:     {}", registry.divider_name());
    println!("entities:");
    for entity in registry.entities() {
        let scope = if entity.is_scoped() { "scoped" } else { "unscoped" };
        println!(
            "  {:<24} {:<10} {} fields",
            entity.name,
            scope,
            entity.fields.len()
        );
    }
    println!("fingerprint: {}", registry.fingerprint());
    Ok(())
}

fn run_init(
    config: Option<&Path>,
    email: Option<String>,
    password: Option<String>,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let settings = Settings::load(config)?;
    let registry = datamodel::load_and_compile(&settings.datamodel.path)?;

    fs::create_dir_all(&settings.server.data_dir)?;
    let store = SqliteStore::new(settings.server.db_path())?;
    store.initialize()?;

    if store.has_superuser()? {
        bail!("Server already initialized: a superuser exists.");
    }

    let email = match email {
        Some(email) => email,
        None if non_interactive => bail!("--email is required with --non-interactive"),
        None => inquire::Text::new("Superuser email:")
            .with_validator(|input: &str| {
                if input.contains('@') {
                    Ok(inquire::validator::Validation::Valid)
                } else {
                    Ok(inquire::validator::Validation::Invalid(
                        "Enter an email address".into(),
                    ))
                }
            })
            .prompt()?,
    };

    let password = match password {
        Some(password) => password,
        None if non_interactive => bail!("--password is required with --non-interactive"),
        None => inquire::Password::new("Password:")
            .with_validator(|input: &str| {
                if input.chars().count() >= MIN_PASSWORD_LEN {
                    Ok(inquire::validator::Validation::Valid)
                } else {
                    Ok(inquire::validator::Validation::Invalid(
                        format!("Use at least {MIN_PASSWORD_LEN} characters").into(),
                    ))
                }
            })
            .prompt()?,
    };
    if password.chars().count() < MIN_PASSWORD_LEN {
        bail!("Password must be at least {MIN_PASSWORD_LEN} characters");
    }

    let now = Utc::now();
    let data = match registry.get("User") {
        Some(entity) => entity.materialize(&Map::new(), now)?,
        None => Map::new(),
    };

    let user = User {
        id: Uuid::new_v4().to_string(),
        email: normalize_email(&email),
        password_hash: TokenGenerator::for_passwords().hash(&password)?,
        first_name: String::new(),
        last_name: String::new(),
        flags: Level::Superuser.flags(),
        password_modification_date: now,
        unsubscribe_all: false,
        data,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user)?;

    println!();
    println!("========================================");
    println!("Created superuser '{}'", user.email);
    println!("Database: {}", settings.server.db_path().display());
    println!("========================================");
    println!();

    Ok(())
}

async fn run_serve(config: Option<&Path>) -> anyhow::Result<()> {
    let settings = match Settings::load(config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(compile_or_exit(&settings.datamodel.path));

    fs::create_dir_all(&settings.server.data_dir)?;
    let store = SqliteStore::new(settings.server.db_path())?;
    store.initialize()?;

    if !store.has_superuser()? {
        bail!(
            "Server not initialized. Run 'concrete admin init' first to create the first superuser."
        );
    }

    let state = Arc::new(AppState::new(
        Arc::new(store),
        registry,
        settings.auth.clone(),
    ));

    let app = create_router(state);
    let addr = settings.server.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("concrete=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                config,
                email,
                password,
                non_interactive,
            } => {
                run_init(config.as_deref(), email, password, non_interactive)?;
            }
        },
        Commands::Check { path, json } => {
            if let Err(e) = run_check(&path, json) {
                eprintln!("error[{}]: {e}", e.code());
                std::process::exit(1);
            }
        }
        Commands::Serve { config } => {
            run_serve(config.as_deref()).await?;
        }
    }

    Ok(())
}
