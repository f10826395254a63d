use anyhow::Result;
use clap::Parser;
use meridian::config::Settings;
use meridian::pipeline::Pipeline;
use meridian::stats::PipelineStats;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "meridian")]
#[command(about = "Build geographic nearest-neighbor indices from a Wikipedia dump")]
struct Cli {
    /// Path to the Wikipedia dump file (.xml or .xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for generated structures
    #[arg(short, long)]
    output: PathBuf,

    /// Properties file with limits, thresholds and weights
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Limit number of articles to process (for testing)
    #[arg(long, default_value_t = 0)]
    limit: u64,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(args: Cli) -> Result<()> {
    let settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::with_defaults(&args.output),
    };

    let stats = PipelineStats::new();
    let pipeline = Pipeline::new(&settings, &stats, &args.input, args.limit);

    info!(input = ?args.input, output = ?args.output, "Starting pipeline");
    let reports = pipeline.run()?;

    println!();
    println!("=== Summary ===");
    let mut total = std::time::Duration::ZERO;
    for report in &reports {
        if report.skipped {
            println!("{:<20}skipped", report.name);
        } else {
            println!(
                "{:<20}{:.2}s",
                report.name,
                report.duration.as_secs_f64()
            );
            total += report.duration;
        }
    }
    println!("{:<20}{:.2}s", "Total", total.as_secs_f64());
    println!();
    println!("Records read:       {}", stats.records());
    println!("Records skipped:    {}", stats.skipped());
    println!("Parse errors:       {}", stats.parse_errors());
    println!("Redirects:          {}", stats.redirects());
    println!("Coordinates:        {}", stats.coordinates());
    println!("Vectors built:      {}", stats.vectors());
    println!("Located-at hits:    {}", stats.located_at());
    println!("Is-a-in hits:       {}", stats.is_a_in());
    println!("Integrity skips:    {}", stats.integrity());
    println!("Neighbors emitted:  {}", stats.neighbors());

    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    match run(args) {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
