use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use deskmate_agents::TurnRequest;
use deskmate_config::{AppConfig, ConfigLoader};
use deskmate_gateway::scanner::scan_once;
use deskmate_gateway::{AppState, GatewayServer, Stores};
use deskmate_security::{InputValidator, RedactingWriter};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deskmate")]
#[command(about = "Employee assistant for leave, room bookings and expense claims", long_about = None)]
struct Cli {
    /// Path to a YAML or TOML config file
    #[arg(long, global = true, env = "DESKMATE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single turn from the terminal and store it
    Chat {
        #[arg(short, long)]
        user: String,
        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
        /// Attach a receipt or other image
        #[arg(long)]
        image: Option<PathBuf>,
        message: String,
    },
    /// Create the database schema
    InitDb {
        /// Also load the default rooms, leave types, claim categories and policies
        #[arg(long)]
        seed: bool,
    },
    /// Run the stale-claim scan once
    ScanNudges,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = ConfigLoader::new(cli.config.clone())
        .load()
        .context("failed to load configuration")?;

    match cli.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Chat {
            user,
            conversation,
            image,
            message,
        } => chat(config, &user, conversation, image.as_deref(), &message).await,
        Command::InitDb { seed } => init_db(&config, seed).await,
        Command::ScanNudges => scan_nudges(&config).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    GatewayServer::new(config).run().await?;
    Ok(())
}

async fn chat(
    config: AppConfig,
    user: &str,
    conversation: Option<String>,
    image: Option<&Path>,
    message: &str,
) -> Result<()> {
    let user_id = InputValidator::user_id(user)?.to_string();
    let message = InputValidator::message(message)?;
    let image = match image {
        Some(path) => Some(InputValidator::image(&image_data_url(path)?)?),
        None => None,
    };

    let stores = Stores::open(&config.database.path)?;
    let state = AppState::new(config, stores)?;

    let conversation = {
        let store = state.stores.conversations.lock().await;
        match conversation {
            Some(id) => match store.get_conversation(&id)? {
                Some(c) if c.user_id == user_id => c,
                Some(_) => bail!("conversation {id} belongs to another user"),
                None => bail!("conversation {id} not found"),
            },
            None => store.create_conversation(&user_id, &message)?,
        }
    };
    let history = state
        .stores
        .conversations
        .lock()
        .await
        .load_messages(&conversation.id)?;

    let result = state
        .supervisor
        .run_turn(TurnRequest {
            user_message: message,
            user_id,
            conversation_id: conversation.id.clone(),
            history,
            image,
        })
        .await;

    state
        .stores
        .conversations
        .lock()
        .await
        .append_messages(&conversation.id, &result.messages)?;

    println!("{}", result.response_text);
    for action in &result.tool_actions {
        eprintln!("  [{}] {}", action.tool, action.args);
    }
    eprintln!(
        "conversation {} | model {} | attempts {}",
        conversation.id, result.model_used, result.attempts
    );
    if let Some(error) = result.error {
        bail!("turn failed: {error}");
    }
    Ok(())
}

fn image_data_url(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "image/jpeg",
    };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

async fn init_db(config: &AppConfig, seed: bool) -> Result<()> {
    let stores = Stores::open(&config.database.path)?;
    if seed {
        let seeded = stores.workplace.lock().await.seed_defaults()?;
        if seeded {
            info!("loaded default workplace data");
        } else {
            info!("workplace data already present, skipping seed");
        }
    }
    println!("database ready at {}", config.database.path.display());
    Ok(())
}

async fn scan_nudges(config: &AppConfig) -> Result<()> {
    let stores = Stores::open(&config.database.path)?;
    let created = scan_once(&stores.nudges, config.nudges.stale_claim_days).await?;
    println!("created {created} reminder(s)");
    Ok(())
}
