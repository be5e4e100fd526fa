//! Edgeplane CLI - Main entry point.

use edgeplane::cli::{AccessPointCommands, Cli, Commands};
use edgeplane::client::CoordinatorClient;
use edgeplane::config::EdgeplaneConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Server { bind_addr, area } => {
            let mut config = match &cli.config {
                Some(path) => EdgeplaneConfig::from_file(path)?,
                None => EdgeplaneConfig::development(),
            };
            if let Some(addr) = bind_addr {
                config.server.bind_addr = addr.parse()?;
            }
            if let Some(area) = area {
                config.coordinator.area = area;
            }
            config.observability.log_level = cli.log_level;
            config.validate()?;

            edgeplane::run(config).await?;
        }

        Commands::Cache { cid, reliability, addr } => {
            let client = CoordinatorClient::new(&addr);
            let job_id = client.cache_content(&cid, reliability).await?;
            println!("Caching {} as job {}", cid, job_id);
        }

        Commands::Job { cid, job_id, addr } => {
            let client = CoordinatorClient::new(&addr);
            let job = client.job_status(&cid, job_id.as_deref()).await?;
            println!("  Content: {}", job.content_id);
            println!("  Job: {}", job.job_id);
            println!("  Status: {:?}", job.status);
            match job.total_size {
                Some(total) => println!("  Progress: {}/{} bytes", job.done_size, total),
                None => println!("  Progress: {} bytes", job.done_size),
            }
            println!("  Blocks: {} ({} unassigned)", job.blocks, job.unassigned);
        }

        Commands::Elect { addr } => {
            let client = CoordinatorClient::new(&addr);
            let report = client.run_election().await?;
            println!("Elected {} validators in {} passes", report.validators.len(), report.passes);
            for (device, geos) in &report.validators {
                let geos: Vec<&str> = geos.iter().map(String::as_str).collect();
                println!("  {} -> {}", device, geos.join(", "));
            }
            for (geo, missing) in &report.unmet {
                println!("  {} short by {}", geo, missing);
            }
        }

        Commands::SpotCheck { addr } => {
            let client = CoordinatorClient::new(&addr);
            let outcomes = client.run_spot_check().await?;
            println!("Audited {} blocks", outcomes.len());
            for outcome in &outcomes {
                println!(
                    "  {} by {}: {} ({})",
                    outcome.edge,
                    outcome.validator,
                    outcome.verdict.as_str(),
                    outcome.expected
                );
            }
        }

        Commands::AccessPoint { command } => match command {
            AccessPointCommands::Add { area_id, url, weight, token, addr } => {
                let client = CoordinatorClient::new(&addr);
                client.add_access_point(&area_id, &url, weight, &token).await?;
                println!("Added {} to {}", url, area_id);
            }
            AccessPointCommands::Remove { area_id, addr } => {
                let client = CoordinatorClient::new(&addr);
                let removed = client.remove_access_point(&area_id).await?;
                println!("Removed {} ({} schedulers)", removed.area_id, removed.schedulers.len());
            }
            AccessPointCommands::List { addr } => {
                let client = CoordinatorClient::new(&addr);
                for area in client.list_access_points().await? {
                    println!("{}", area);
                }
            }
            AccessPointCommands::Show { area_id, addr } => {
                let client = CoordinatorClient::new(&addr);
                let access_point = client.show_access_point(&area_id).await?;
                println!("{}", access_point.area_id);
                for scheduler in &access_point.schedulers {
                    println!(
                        "  {} weight={} online={}",
                        scheduler.url, scheduler.weight, scheduler.online
                    );
                }
            }
            AccessPointCommands::Get { area_id, addr } => {
                let client = CoordinatorClient::new(&addr);
                for url in client.get_access_points(&area_id).await? {
                    println!("{}", url);
                }
            }
        },

        Commands::Status { addr } => {
            let client = CoordinatorClient::new(&addr);
            match client.status().await {
                Ok(status) => {
                    println!("Fleet status ({})", addr);
                    println!("  Edges online: {}", status.edges_online);
                    println!("  Candidates online: {}", status.candidates_online);
                    println!("  Validators: {}", status.validators);
                    let mut groups: Vec<_> = status.groups.into_iter().collect();
                    groups.sort();
                    for (geo, count) in groups {
                        println!("  {}: {} groups", geo, count);
                    }
                }
                Err(e) => {
                    eprintln!("Failed to connect to coordinator: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Edgeplane v{}", env!("CARGO_PKG_VERSION"));
            println!("Control plane for a geographically distributed edge caching network");
        }
    }

    Ok(())
}
