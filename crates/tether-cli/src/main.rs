use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nostr_sdk::{Client, PublicKey};
use tether_core::models::Pointer;
use tether_core::query::Completion;
use tether_core::tracing_setup::init_tracing;
use tether_core::{Engine, EngineConfig, EngineRuntime, NostrSdkTransport, PageParams};
use tokio::sync::oneshot;
use tokio::time::Instant;

mod output;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Aggregate web bookmarks from many relays")]
struct Cli {
    /// Path to JSON engine config (defaults to <config dir>/tether/config.json)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Print engine statistics to stderr on exit
    #[arg(long)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PageArgs {
    /// Narrow the page to an npub, nprofile, note, nevent or naddr
    #[arg(long, value_parser = parse_pointer)]
    pointer: Option<Pointer>,

    /// Only bookmarks carrying this hashtag
    #[arg(long)]
    hashtag: Option<String>,

    /// Only bookmarks of this URL path (the `d` value, without scheme)
    #[arg(long)]
    path: Option<String>,

    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Show this account's follows and apply its public mutes
    #[arg(long, value_parser = parse_pubkey)]
    pubkey: Option<PublicKey>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page of bookmarks and print it grouped by URL
    Bookmarks {
        #[command(flatten)]
        page: PageArgs,

        /// Seconds to wait for the page
        #[arg(long, default_value_t = 15)]
        timeout: u64,

        /// Milliseconds to let follow-up fetches land after the page completes
        #[arg(long, default_value_t = 2000)]
        settle_ms: u64,
    },

    /// Follow a page live and print store changes as JSON lines
    Watch {
        #[command(flatten)]
        page: PageArgs,
    },
}

fn parse_pointer(raw: &str) -> std::result::Result<Pointer, String> {
    Pointer::from_bech32(raw).ok_or_else(|| format!("not a NIP-19 pointer: {raw}"))
}

fn parse_pubkey(raw: &str) -> std::result::Result<PublicKey, String> {
    PublicKey::parse(raw).map_err(|e| e.to_string())
}

fn print_json<S: serde::Serialize>(value: &S, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

/// Load configuration from `--config`, else the default location if present.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = path {
        return EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }

    let default_path = dirs::config_dir().map(|dir| dir.join("tether").join("config.json"));
    match default_path {
        Some(path) if path.exists() => EngineConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        _ => Ok(EngineConfig::default()),
    }
}

impl PageArgs {
    fn into_params(self, completion: Option<Completion>) -> PageParams {
        PageParams {
            pointer: self.pointer,
            hashtag: self.hashtag,
            path: self.path,
            limit: self.limit,
            until: None,
            login: self.pubkey,
            completion,
        }
    }
}

async fn run_bookmarks(
    runtime: &EngineRuntime<NostrSdkTransport>,
    page: PageArgs,
    timeout: Duration,
    settle: Duration,
    pretty: bool,
) -> Result<()> {
    let hashtag = page.hashtag.clone();
    let path = page.path.clone();
    let login = page.pubkey;

    let (done, page_loaded) = oneshot::channel();
    let params = page.into_params(Some(Completion::Notify(done)));
    runtime.with_engine(|engine| engine.fetch_bookmark_page(params, Instant::now()));

    match tokio::time::timeout(timeout, page_loaded).await {
        Ok(_) => tracing::info!("bookmark page loaded"),
        Err(_) => tracing::warn!(?timeout, "bookmark page timed out, printing what arrived"),
    }
    tokio::time::sleep(settle).await;

    let groups = runtime.with_engine(|engine| {
        let mutes = output::public_mutes(engine, login.as_ref());
        output::bookmark_groups(engine, hashtag.as_deref(), path.as_deref(), &mutes)
    });
    print_json(&groups, pretty)
}

async fn run_watch(
    runtime: &EngineRuntime<NostrSdkTransport>,
    page: PageArgs,
    pretty: bool,
) -> Result<()> {
    let mut updates = runtime.with_engine(|engine| engine.subscribe_to_store());
    let params = page.into_params(None);
    runtime.with_engine(|engine| engine.fetch_bookmark_page(params, Instant::now()));

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => print_json(&output::update(&update), pretty)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing().context("failed to initialize logging")?;
    let config = load_config(cli.config.as_deref())?;

    let client = Client::default();
    let (transport, inbox) = NostrSdkTransport::new(client.clone());
    let runtime = EngineRuntime::new(Engine::new(config, transport));
    let (stop, shutdown) = oneshot::channel();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let driver = runtime.clone();
            let engine_loop = tokio::task::spawn_local(async move { driver.run(inbox, shutdown).await });

            let result = match cli.command {
                Commands::Bookmarks {
                    page,
                    timeout,
                    settle_ms,
                } => {
                    run_bookmarks(
                        &runtime,
                        page,
                        Duration::from_secs(timeout),
                        Duration::from_millis(settle_ms),
                        cli.pretty,
                    )
                    .await
                }
                Commands::Watch { page } => run_watch(&runtime, page, cli.pretty).await,
            };

            if cli.stats {
                let stats = runtime.with_engine(|engine| engine.stats().clone());
                eprintln!("{}", serde_json::to_string_pretty(&stats)?);
            }

            runtime.dispose();
            let _ = stop.send(());
            engine_loop.await.context("engine loop panicked")?;
            client.disconnect().await;
            result
        })
        .await
}
