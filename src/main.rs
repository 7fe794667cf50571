use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use log::info;
use maintenance_calendar::{BuildOptions, DEFAULT_DASHBOARD_URL, SameDayRule};

mod health;
mod inventory;

#[derive(Parser)]
#[command(
    version = git_version::git_version!(fallback = "unknown"),
    about = "Writes upcoming AWS scheduled maintenance to an iCalendar file"
)]
struct Args {
    /// Where to write the calendar. Any existing file is overwritten.
    #[arg(long)]
    filename: PathBuf,
    /// Region to query the Health API in.
    #[arg(long, default_value = "us-east-1", value_parser = NonEmptyStringValueParser::new())]
    region: String,
    #[arg(long)]
    debug: bool,
    /// Resolve same-day maintenance windows the way older calendars did: a window only counts as
    /// passed if both its start hour and start minute are earlier than the event's.
    #[arg(long)]
    legacy_same_day_rule: bool,
    /// Upper bound on any single AWS call, including retries.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,
    #[arg(long, default_value = DEFAULT_DASHBOARD_URL)]
    dashboard_url: String,
}

impl Args {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            same_day_rule: if self.legacy_same_day_rule {
                SameDayRule::Legacy
            } else {
                SameDayRule::Exact
            },
            dashboard_url: self.dashboard_url.as_str().into(),
        }
    }
}

fn init_logger_or_die(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // The AWS SDK and hyper log a lot of `DEBUG` information.
    simple_logger::SimpleLogger::new()
        .with_utc_timestamps()
        .with_level(log::LevelFilter::Warn)
        .with_module_level("health_calendar", level)
        .with_module_level("maintenance_calendar", level)
        .init()
        .unwrap();
}

async fn run(args: Args) -> Result<()> {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(args.region.clone()))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(args.timeout_secs))
                .build(),
        )
        .retry_config(RetryConfig::standard().with_max_attempts(args.max_attempts))
        .load()
        .await;

    let health = health::AwsHealthSource::new(&sdk_config);
    let mut inventory = inventory::AwsInventory::new(inventory::ClientRegistry::new(sdk_config));

    info!("Fetching scheduled changes from {}...", args.region);
    let events = maintenance_calendar::fetch_health_events(&health).await?;
    let entries =
        maintenance_calendar::build_calendar_entries(&events, &mut inventory, &args.build_options())
            .await;

    info!(
        "Saving {} entries to {}...",
        entries.len(),
        args.filename.display()
    );
    maintenance_calendar::write_calendar(&args.filename, &entries)?;
    info!("Successfully saved calendar");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger_or_die(args.debug);
    run(args).await
}
