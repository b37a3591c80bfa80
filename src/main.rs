mod cli;

use clap::Parser;
use cli::{Cli, Commands, CrawlArgs};
use std::time::Duration;

use crawlbox::config::Config;
use crawlbox::jobs::NewJob;
use crawlbox::observability::init_tracing;
use crawlbox::pipeline::Pipeline;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

const CRAWL_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    init_tracing("info");

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Server(args) => {
            let address = args.address.unwrap_or(config.server.bind_addr);
            crawlbox::api::run(config, address).await?
        }
        Commands::Crawl(args) => crawl(config, args).await?,
    }

    Ok(())
}

async fn crawl(config: Config, args: CrawlArgs) -> Result<(), AnyError> {
    let pipeline = Pipeline::start(&config).await?;

    let new_job = NewJob::builder()
        .project_id(args.project)
        .keywords(args.keywords)
        .max_images(args.max_images)
        .maybe_priority(args.priority)
        .build();

    let outcome = async {
        let job_id = pipeline.manager.create_job(new_job).await?;
        tracing::info!(job_id = %job_id, "Crawl job submitted");
        pipeline.manager.wait_for_job(&job_id, CRAWL_POLL_INTERVAL).await
    }
    .await;

    pipeline.shutdown().await;

    let status = outcome?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
