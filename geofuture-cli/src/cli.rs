use clap::{Parser, ValueEnum};

/// Runs task composition scenarios over a reverse geocoding lookup
#[derive(Parser, Debug)]
#[command(name = "geofuture")]
#[command(author = "4n6h4x0r")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Exercises task composition against the Nominatim reverse geocoder", long_about = None)]
pub struct Args {
    /// Latitude to look up (defaults to Dubai)
    #[arg(long = "lat", default_value_t = 25.2048, allow_negative_numbers = true)]
    pub latitude: f64,

    /// Longitude to look up (defaults to Dubai)
    #[arg(long = "lon", default_value_t = 55.2708, allow_negative_numbers = true)]
    pub longitude: f64,

    /// Answer every lookup with the expected address instead of calling the API
    #[arg(long = "offline")]
    pub offline: bool,

    /// Worker threads (0 = one per CPU)
    #[arg(short = 't', long = "threads", default_value_t = 0)]
    pub threads: usize,

    /// Run only this scenario (repeatable)
    #[arg(short = 's', long = "scenario", value_name = "NAME")]
    pub scenarios: Vec<String>,

    /// Branch taken by the success-gated scenario
    #[arg(long = "branch", value_enum, default_value_t = BranchArg::Alternate)]
    pub branch: BranchArg,

    /// City the lookup is expected to return
    #[arg(long = "expect-city", default_value = "Dubai")]
    pub expect_city: String,

    /// Country code the lookup is expected to return
    #[arg(long = "expect-country", default_value = "AE")]
    pub expect_country: String,

    /// HTTP timeout in seconds
    #[arg(long = "timeout", default_value_t = 30)]
    pub timeout_secs: u64,

    /// List the available scenarios and exit
    #[arg(long = "list")]
    pub list: bool,

    /// Print the reports as JSON
    #[arg(long = "json")]
    pub json: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchArg {
    Success,
    Failure,
    Alternate,
}

/// Parses command-line arguments
pub fn parse_args() -> Args {
    Args::parse()
}
