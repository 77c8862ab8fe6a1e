use std::io::Write;
use std::sync::Arc;
use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use client::ClientBuilder;
use config::{ClientConfig, ConfigStore, resolve_api_key};
use i18n::I18n;
use secrets::{SecretStore, default_secret_dir_from};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod shell;

use shell::{Command, Shell};

const SECRET_PASSWORD_ENV: &str = "MEDIAQA_SECRET_PASSWORD";

#[tokio::main]
async fn main() -> Result<()> {
    let mut data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    data_dir.push("mediaqa");
    if let Err(err) = fs::create_dir_all(&data_dir) {
        eprintln!("failed to prepare data dir: {err}");
    }
    let _log_guard = init_local_logger(&data_dir.join("logs"));

    let config_store = ConfigStore::from_default_location().unwrap_or_else(|err| {
        error!("no platform config dir ({err:#}); keeping config under the data dir");
        ConfigStore::from_dir(data_dir.join("config"))
    });
    let mut config = match config_store.load_or_init() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err:#}");
            ClientConfig::default()
        }
    };
    config.apply_env_overrides();

    let mut secret_store = SecretStore::new(default_secret_dir_from(&data_dir));
    if config.security.local_encryption_enabled {
        let password = std::env::var(SECRET_PASSWORD_ENV).ok();
        if password.is_none() {
            bail!("local encryption is enabled; set {SECRET_PASSWORD_ENV} to unlock the secret store");
        }
        secret_store = secret_store.with_password(password);
    }
    let secret_store = Arc::new(secret_store);

    let stored_key = secret_store
        .resolve(&config.backend.api_key_ref)
        .unwrap_or_else(|err| {
            warn!("failed to read the stored service credential ({err:#}); ignoring it");
            None
        });
    let client = ClientBuilder::from_config(&config)
        .api_key(resolve_api_key(stored_key))
        .storage(secret_store)
        .build();
    info!(base_url = %config.backend.base_url, "mediaqa shell starting");

    let i18n = I18n::new(config.language);
    println!("{}", i18n.t("app.title"));
    println!("{}", shell::HELP);
    let mut shell = Shell::new(client, i18n);
    print!("{}", shell.render_notices());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        let output = shell.execute(command).await;
        print!("{output}");
    }

    info!("mediaqa shell exiting");
    Ok(())
}

fn init_local_logger(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "mediaqa.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,app_cli=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}
