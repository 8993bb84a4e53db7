mod config;
mod console;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use banter_engine::batch::BatchPipeline;
use banter_engine::prompt::PromptEngine;
use banter_engine::retrieval::CachingConversationClient;
use banter_engine::runner::{RunnerServices, ScriptRunner};
use banter_engine::store::MemoryStore;
use banter_h::{ApiClient, BrowserSession, HostedPage};
use banter_script::CommandRegistry;

use config::BanterConfig;
use console::{ConsoleLog, ConsoleResults, ConsoleStatus};

#[derive(Parser)]
#[command(name = "banter", version, about = "Script the hosted chat page")]
struct Args {
    /// Script file to execute instead of starting the REPL
    #[arg(long)]
    file: Option<String>,

    /// Chat site origin to drive (overrides the config file)
    #[arg(long)]
    url: Option<String>,

    /// Launch the browser with a visible window
    #[arg(long)]
    visible: bool,

    /// Config file path; defaults to ./banter.yaml, then ~/.banter/config.yaml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the REPL and results.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BanterConfig::load_from(path).await?,
        None => BanterConfig::load_default().await?,
    };
    if let Some(url) = args.url {
        config.chat_url = url;
    }
    if args.visible {
        config.visible = true;
    }

    let host = url::Url::parse(&config.chat_url)?
        .host_str()
        .ok_or_else(|| anyhow!("chat url has no host: {}", config.chat_url))?
        .to_string();

    let session = BrowserSession::launch(
        &config.chat_url,
        config.visible,
        config.profile_dir.as_deref(),
    )
    .await
    .map_err(|e| anyhow!(e))?;

    let result = drive(&session, &host, &config, args.file).await;

    if let Err(e) = session.close().await {
        tracing::warn!("Error closing browser: {e}");
    }
    result
}

async fn drive(
    session: &BrowserSession,
    host: &str,
    config: &BanterConfig,
    file: Option<String>,
) -> anyhow::Result<()> {
    let hosted = Arc::new(HostedPage::new(session.page().clone()));
    let cookie = session.cookie_header(host).await.map_err(|e| anyhow!(e))?;
    if cookie.is_empty() {
        eprintln!("No session cookies found; log in first (try --visible) and rerun.");
    }
    let api = Arc::new(ApiClient::new(config.chat_url.trim_end_matches('/'), cookie));

    let store = Arc::new(MemoryStore::new());
    let caching = Arc::new(CachingConversationClient::new(api.clone(), store.clone()));
    let status = Arc::new(ConsoleStatus);
    let log = Arc::new(ConsoleLog);
    let results = Arc::new(ConsoleResults::new());

    let engine = PromptEngine::new(hosted.clone(), hosted.clone(), api.clone(), log.clone());
    let batch = BatchPipeline::new(caching.clone(), api.clone(), results, log.clone());
    let runner = Arc::new(ScriptRunner::new(
        CommandRegistry::standard(),
        RunnerServices {
            engine,
            batch,
            context: hosted.clone(),
            conversations: caching,
            observer: hosted,
            store,
            status,
            log,
        },
    ));

    match file {
        Some(path) => repl::run_file(runner, &path).await,
        None => repl::run_repl(runner).await,
    }
}
