use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crawlbox")]
#[command(about = "Crawlbox image crawl pipeline", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $CRAWLBOX_CONFIG or config/crawlbox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API together with the worker pool
    Server(ServerArgs),
    /// Run a single job to completion and print its final status
    Crawl(CrawlArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct CrawlArgs {
    /// Search keyword; repeat for several
    #[arg(long = "keyword", short = 'k', required = true)]
    pub keywords: Vec<String>,

    /// Number of images to collect
    #[arg(long)]
    pub max_images: u32,

    #[arg(long, default_value = "default")]
    pub project: String,

    /// Chunk priority, 0 to 10
    #[arg(long)]
    pub priority: Option<u8>,
}
