mod cli;

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use keypin::commands::Dispatcher;
use keypin::config::ConfigManager;
use keypin::host::{Host, MemoryBrowser};
use keypin::logging;
use keypin::store::{JsonFileStorage, LayeredKeysetStore};
use serde_json::{json, Value};

use cli::{Cli, CliCommand};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse_args();

    let mut config = match &cli.config {
        Some(path) => ConfigManager::with_file(path),
        None => ConfigManager::new()?,
    };
    if let Some(data_dir) = &cli.data_dir {
        config.app_config_mut().storage.data_dir = Some(data_dir.clone());
    }
    if let Some(level) = &cli.log_level {
        config.app_config_mut().general.log_level = level.clone();
    }

    let general = config.app_config().general.clone();
    let _log_guard = logging::init(&general.log_level, general.log_file.as_deref());

    let request: Value = match cli.command {
        CliCommand::Init => return init(&config),
        CliCommand::Combo { input, keys } => json!({
            "command": "executeCombo",
            "args": {"input": input.unwrap_or_default(), "keyCodes": keys},
        }),
        CliCommand::Call { json } => {
            serde_json::from_str(&json).wrap_err("request is not valid JSON")?
        }
    };

    let browser = match &cli.snapshot {
        Some(path) => MemoryBrowser::load(path)?,
        None => MemoryBrowser::new(),
    };
    let browser = Arc::new(browser);

    let data_dir = config.data_dir();
    tracing::debug!("Using data dir {}", data_dir.display());
    let store = LayeredKeysetStore::new(JsonFileStorage::new(data_dir));
    let mut dispatcher = Dispatcher::new(
        store,
        Host::from_browser(browser.clone()),
        &config.app_config().pins,
    );

    let response = dispatcher.handle_request(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if let Some(path) = &cli.snapshot {
        browser.save(path)?;
    }
    Ok(())
}

fn init(config: &ConfigManager) -> Result<()> {
    if config.write_default_config()? {
        println!("Wrote {}", config.config_path().display());
    } else {
        println!("{} already exists", config.config_path().display());
    }
    Ok(())
}
