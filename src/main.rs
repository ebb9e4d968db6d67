//! cfscout CLI - one-shot discovery of scrapeable platform instances

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use cfscout::cache::CachedCloudController;
use cfscout::client::{CloudController, CloudControllerClient, RequestFetcher, UpstreamRateLimiter};
use cfscout::config::Config;
use cfscout::discovery::DiscoveryService;
use cfscout::Result;

#[derive(Parser)]
#[command(
    name = "cfscout",
    version,
    about = "Discovers scrapeable application instances on Cloud Foundry style platforms"
)]
struct Cli {
    /// Path to the configuration file (default: ~/.cfscout/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print instances as JSON instead of plain lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)?;

    let rate_limiter = Arc::new(UpstreamRateLimiter::new(config.rate_limit_per_second));
    let fetcher = Arc::new(RequestFetcher::new(
        rate_limiter,
        config.fetcher.request_timeout(),
        config.fetcher.backoff_base(),
    ));
    let http_client = Arc::new(CloudControllerClient::new(&config.api, fetcher)?);
    let cached = Arc::new(CachedCloudController::new(http_client, &config.cache));
    let _maintenance = cached.start_maintenance(config.cache.maintenance_interval());

    let service = DiscoveryService::new(cached as Arc<dyn CloudController>, &config);
    let instances = service.discover(None, None).await;

    if cli.json {
        let entries: Vec<serde_json::Value> = instances
            .iter()
            .map(|i| {
                serde_json::json!({
                    "instance_id": i.instance_id,
                    "access_url": i.access_url,
                    "internal": i.internal,
                    "org": i.target.org_name,
                    "space": i.target.space_name,
                    "application": i.target.application_name,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for instance in &instances {
            println!("{}\t{}", instance.instance_id, instance.access_url);
        }
    }

    Ok(())
}
