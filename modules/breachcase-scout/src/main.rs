use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use breachcase_common::Config;
use breachcase_scout::checkpoint::CheckpointStore;
use breachcase_scout::feeds::FeedArticleSource;
use breachcase_scout::gateway::{ClassifierGateway, RetryPolicy};
use breachcase_scout::pipeline::{Pipeline, PipelineOptions};
use breachcase_scout::store::PgIncidentStore;
use breachcase_scout::traits::ArticleSource;

#[derive(Parser, Debug)]
#[command(about = "Fetch security news and resolve it into incidents")]
struct Args {
    /// Override CHECKPOINT_PATH.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Skip the relevance screen and extract every article.
    #[arg(long)]
    no_classification: bool,

    /// Override ARTICLE_LOOKBACK_HOURS.
    #[arg(long)]
    lookback_hours: Option<i64>,

    /// Resolve and log decisions without writing anything.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("breachcase=info".parse()?))
        .init();

    let args = Args::parse();
    info!("Breach scout starting...");

    let mut config = Config::from_env()?;
    if let Some(path) = args.checkpoint {
        config.checkpoint_path = path;
    }
    if let Some(hours) = args.lookback_hours {
        config.article_lookback_hours = hours;
    }
    if args.no_classification {
        config.enable_classification = false;
    }

    let completion = OpenAi::new(config.deepseek_api_key.clone(), config.deepseek_model.clone())
        .with_base_url(config.deepseek_base_url.clone())
        .with_timeout(config.deepseek_timeout);
    let gateway = ClassifierGateway::new(
        Arc::new(completion),
        RetryPolicy::new(config.max_retries, config.retry_base),
    )
    .with_max_tokens(config.classification_max_tokens, config.deepseek_max_tokens);

    let store = PgIncidentStore::connect(&config.database_url).await?;
    store.migrate().await?;

    let source = FeedArticleSource::new(
        config.request_timeout,
        config.article_lookback_hours,
        config.max_feed_workers,
    )?;
    let checkpoint = CheckpointStore::open(&config.checkpoint_path)?;

    let options = PipelineOptions {
        dry_run: args.dry_run,
        ..PipelineOptions::from_config(&config)
    };
    let mut pipeline = Pipeline::new(
        Arc::new(store),
        Arc::new(gateway),
        checkpoint,
        config.policy,
        options,
    );

    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current article");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let articles = source.fetch_articles().await?;
    let stats = pipeline.run(articles).await?;
    info!("{stats}");

    if stats.errors > 0 {
        error!(errors = stats.errors, "Run finished with article failures");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
