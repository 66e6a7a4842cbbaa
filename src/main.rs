use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;

use wiralis_bot::infrastructure::adapters::{ConsoleAdapter, TelegramAdapter};
use wiralis_bot::infrastructure::config::Config;
use wiralis_bot::infrastructure::database::Database;
use wiralis_bot::infrastructure::logging;
use wiralis_bot::kernel::{BotCore, ModuleRegistry};
use wiralis_bot::modules::builtin_catalog;
use wiralis_bot::BotError;

/// Long-poll timeout for getUpdates
const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "wiralis-bot")]
#[command(about = "WIRALIS community bot with hot-reloadable modules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Bot token (overrides config)
    #[arg(short, long)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot (console mode without a token)
    Run,
    /// Show version
    Version,
    /// Write the default config
    InitConfig,
    /// List discovered modules in load order
    Modules,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            if let Err(e) = run_bot(&cli.config, cli.token) {
                tracing::error!("Bot stopped: {}", e);
                eprintln!("wiralis-bot: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("wiralis-bot v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => init_config(&cli.config),
        Commands::Modules => list_modules(&cli.config),
    }
}

/// Config file when present, defaults plus environment otherwise
fn load_config(path: &str) -> (Config, Option<String>) {
    if !Path::new(path).exists() {
        return (Config::load_env(), None);
    }
    match Config::load(path) {
        Ok(config) => (config, None),
        Err(e) => (Config::load_env(), Some(format!("Failed to load {}: {}, using defaults", path, e))),
    }
}

fn run_bot(config_path: &str, token_override: Option<String>) -> Result<(), BotError> {
    let (mut config, config_warning) = load_config(config_path);
    if let Some(token) = token_override {
        config.bot.token = Some(token);
    }

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Log file unavailable, logging to stdout only: {}", e);
    }
    if let Some(warning) = config_warning {
        tracing::warn!("{}", warning);
    }
    tracing::info!("Starting {}", config.bot.name);

    let store = Arc::new(Database::open(&config.database.path)?);
    let catalog = builtin_catalog(store.clone());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BotError::Internal(format!("Runtime: {}", e)))?;

    match config.token().map(str::to_string) {
        Some(token) => rt.block_on(async move {
            let mut adapter = TelegramAdapter::new(token, &config.bot.prefix);
            adapter.fetch_bot_info().await?;
            let adapter = Arc::new(adapter);

            let core = Arc::new(BotCore::new(config, store, catalog).with_application(adapter.clone()));
            run_telegram_bot(core, adapter).await
        }),
        None => rt.block_on(async move {
            let user_id = config.owners.first().copied().unwrap_or(0);
            let adapter = Arc::new(ConsoleAdapter::new(config.bot.name.clone(), &config.bot.prefix, user_id));

            let core = Arc::new(BotCore::new(config, store, catalog).with_application(adapter.clone()));
            run_console_bot(core, adapter).await
        }),
    }
}

async fn run_telegram_bot(core: Arc<BotCore>, adapter: Arc<TelegramAdapter>) -> Result<(), BotError> {
    use wiralis_bot::domain::traits::Bot;

    adapter.start().await?;
    if let Err(e) = core.post_init().await {
        tracing::error!("Startup failed: {}", e);
    }

    let mut offset = 0;
    tracing::info!("Starting message loop...");
    loop {
        tokio::select! {
            messages = adapter.poll(&mut offset, POLL_TIMEOUT_SECS) => {
                for message in messages {
                    core.dispatch(message).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                return Ok(());
            }
        }
    }
}

async fn run_console_bot(core: Arc<BotCore>, adapter: Arc<ConsoleAdapter>) -> Result<(), BotError> {
    use wiralis_bot::domain::traits::Bot;

    adapter.start().await?;
    if let Err(e) = core.post_init().await {
        tracing::error!("Startup failed: {}", e);
    }

    println!("Console mode. Type commands like /profile, or !<callback_data> to press a button.");
    adapter
        .read_loop(|message| {
            let core = core.clone();
            async move { core.dispatch(message).await }
        })
        .await
}

fn init_config(path: &str) {
    if Path::new(path).exists() {
        eprintln!("{} already exists, not overwriting", path);
        std::process::exit(1);
    }
    match Config::default().save(path) {
        Ok(()) => println!("Default config written to {}", path),
        Err(e) => {
            eprintln!("Failed to write {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn list_modules(config_path: &str) {
    let (config, warning) = load_config(config_path);
    if let Some(warning) = warning {
        eprintln!("{}", warning);
    }
    let store = match Database::open_in_memory() {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let registry = ModuleRegistry::new(builtin_catalog(store), config.modules.disabled.clone());
    for (i, name) in registry.discover().iter().enumerate() {
        println!("{}. {}", i + 1, name);
    }
    for name in &config.modules.disabled {
        println!("-  {} (disabled)", name);
    }
}
