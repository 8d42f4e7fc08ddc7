use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "torspider", about = "Distributed web crawler on a Redis task ledger")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start crawling from the seeds file
    Crawl {
        /// Seeds file: one URL per line, blanks and # comments ignored
        #[arg(short, long)]
        seeds: Option<String>,

        /// Stop after this many finished pages (0 = unlimited)
        #[arg(short, long)]
        max_pages: Option<u64>,

        /// Worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Show queue and ledger counters
    Status,
}
