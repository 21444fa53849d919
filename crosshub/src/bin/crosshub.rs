use std::{
    backtrace::{Backtrace, BacktraceStatus},
    fs,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Result, anyhow};
use clap::Parser;
use crosshub::{
    cfg::Config,
    codec::{EventCatalog, EventCodec},
    crypto::SecretKey,
    relay::Relay,
    rpc::JsonRpcClient,
    store::CrossTxStore,
    view::ChainView,
};
use tokio::sync::mpsc;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(value_parser = SecretKey::from_hex)]
    secret_key: SecretKey,
    #[clap(long, short, default_values = ["config.toml"])]
    config_file: Vec<PathBuf>,
    #[clap(long, default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_ansi(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    // Set a panic hook that records the panic as a `tracing` event at the `ERROR` verbosity level.
    std::panic::set_hook(Box::new(|panic| {
        let message = match panic.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");

        let backtrace = Backtrace::capture();
        let backtrace =
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

        match (panic.location(), backtrace) {
            (None, None) => {
                error!(thread_name, message);
            }
            (None, Some(backtrace)) => {
                error!(thread_name, message, %backtrace);
            }
            (Some(location), backtrace) => {
                error!(
                    thread_name,
                    message,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                    backtrace = backtrace.as_deref().unwrap_or_default(),
                );
            }
        }
    }));

    let mut merged_config = toml::Table::new();
    for config_file in args.config_file {
        let config = fs::read_to_string(&config_file)?;
        let config: toml::Table = toml::from_str(&config)?;
        for key in config.keys() {
            if merged_config.contains_key(key) {
                return Err(anyhow!(
                    "configuration conflict: {config_file:?} contained a key {key:?} that was already included in an earlier file"
                ));
            }
        }
        merged_config.extend(config);
    }

    let config: Config = serde::Deserialize::deserialize(merged_config)?;

    let store = Arc::new(CrossTxStore::open(
        config.data_dir.as_deref(),
        &config.channel,
    )?);
    let catalog = match &config.chain.catalog {
        Some(path) => EventCatalog::from_path(path)?,
        None => EventCatalog::embedded()?,
    };
    let codec = EventCodec::new(Arc::new(catalog));
    let rpc = JsonRpcClient::new(&config.chain.rpc_url, config.chain.rpc_timeout)?;

    info!(
        signer = %args.secret_key.address(),
        channel = %config.channel,
        rpc_url = %config.chain.rpc_url,
        "starting crosshub"
    );

    let (sender, receiver) = mpsc::channel(1);
    let view = ChainView::new(
        config.chain.clone(),
        Arc::new(rpc),
        codec,
        Some(args.secret_key),
        sender,
    )
    .start();
    let relay = tokio::spawn(Relay::new(store, receiver).run());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    view.stop();
    let height = view.join().await?;
    // The view owned the only sender, so the relay drains what is left and then finishes.
    let saved = relay.await?;
    info!(height, saved, "stopped");

    Ok(())
}
