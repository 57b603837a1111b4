use anyhow::{Context, Result};
use geofuture_core::scenarios::{self, ScenarioContext};
use geofuture_core::{
    Address, AlternatingChooser, Branch, Coordinates, FixedChooser, GeocodeFetcher,
    GeocoderConfig, LocationService, NominatimClient, OutcomeChooser, StaticFetcher, WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::BranchArg;

fn main() -> Result<()> {
    let args = cli::parse_args();

    if args.list {
        for scenario in scenarios::SCENARIOS {
            println!("{:<26} {}", scenario.name, scenario.description);
        }
        return Ok(());
    }

    // Initialize logger with appropriate level based on verbose flag
    if std::env::var("RUST_LOG").is_err() {
        if args.verbose {
            std::env::set_var("RUST_LOG", "debug");
        } else {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    let expected = Address::new(args.expect_city.as_str(), args.expect_country.as_str());
    let position = Coordinates::new(args.latitude, args.longitude);

    let fetcher: Arc<dyn GeocodeFetcher> = if args.offline {
        log::info!(
            "Running OFFLINE - every lookup answers {}, {}",
            expected.city,
            expected.country_code
        );
        Arc::new(StaticFetcher::new(expected.clone()))
    } else {
        let config = GeocoderConfig {
            timeout: Duration::from_secs(args.timeout_secs),
            ..GeocoderConfig::default()
        };
        log::info!("Geocoding via {}", config.endpoint);
        Arc::new(NominatimClient::new(config).context("Failed to create geocoding client")?)
    };

    let chooser: Box<dyn OutcomeChooser> = match args.branch {
        BranchArg::Success => Box::new(FixedChooser(Branch::Success)),
        BranchArg::Failure => Box::new(FixedChooser(Branch::Failure)),
        BranchArg::Alternate => Box::new(AlternatingChooser::default()),
    };

    // One pool for the whole run, shared by every scenario
    let pool = WorkerPool::new(args.threads)?;
    let ctx = ScenarioContext {
        service: LocationService::new(pool.clone(), fetcher, position),
        expected,
        chooser,
    };

    log::info!(
        "Running scenarios for {},{} on {} workers",
        ctx.service.position().latitude,
        ctx.service.position().longitude,
        pool.threads()
    );
    let reports = scenarios::run_scenarios(&ctx, &args.scenarios)?;

    drop(ctx);
    pool.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            match (&report.detail, &report.error) {
                (Some(detail), _) if report.success => {
                    println!("✓ {:<26} {}", report.name, detail)
                }
                (_, Some(error)) => println!("✗ {:<26} {}", report.name, error),
                _ => println!("✗ {}", report.name),
            }
        }
    }

    let failed = reports.iter().filter(|r| !r.success).count();
    log::info!(
        "{} of {} scenarios passed",
        reports.len() - failed,
        reports.len()
    );

    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
