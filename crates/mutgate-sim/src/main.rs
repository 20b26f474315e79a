use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use mutgate_core::PipelineConfig;
use mutgate_sim::{run_simulator, run_stress, SimulatorConfig, VERSION};
use std::path::PathBuf;
use std::time::Duration;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Pipeline settings (TOML); defaults apply when omitted")
}

fn cli() -> Command {
    Command::new("mutgate")
        .version(VERSION)
        .about("Confirmable idempotent mutation pipeline: simulator and tools")
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run concurrent operators against a flaky backend")
                .arg(
                    Arg::new("requests")
                        .long("requests")
                        .default_value("500")
                        .value_parser(value_parser!(usize))
                        .help("Distinct request ids to submit"),
                )
                .arg(
                    Arg::new("targets")
                        .long("targets")
                        .default_value("20")
                        .value_parser(value_parser!(usize))
                        .help("Distinct targets the requests are spread over"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("drop-rate")
                        .long("drop-rate")
                        .default_value("0.2")
                        .value_parser(parse_probability)
                        .help("Probability that a remote call loses its connection"),
                )
                .arg(
                    Arg::new("retries")
                        .long("retries")
                        .default_value("3")
                        .value_parser(value_parser!(u32))
                        .help("Resubmissions per operator after an interruption"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Upper bound of simulated remote latency"),
                )
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("stress")
                .about("Fire identical submissions at once and count executions")
                .arg(
                    Arg::new("copies")
                        .long("copies")
                        .default_value("50")
                        .value_parser(value_parser!(usize))
                        .help("Concurrent copies of the request"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective pipeline settings")
                .arg(config_arg()),
        )
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let p: f64 = raw.parse().map_err(|e| format!("{raw:?} is not a number: {e}"))?;
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{raw} is not a probability in 0.0..=1.0"))
    }
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

fn load_config(args: &ArgMatches) -> Result<PipelineConfig> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate().context("invalid pipeline settings")?;
    Ok(config)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                seed: arg(args, "seed")?,
                requests: arg(args, "requests")?,
                targets: arg(args, "targets")?,
                drop_rate: arg(args, "drop-rate")?,
                retries: arg(args, "retries")?,
                max_latency: Duration::from_millis(arg(args, "latency-ms")?),
                pipeline: load_config(args)?,
                ..SimulatorConfig::default()
            };

            println!("Running MutGate Simulator...");
            println!("Requests: {}", config.requests);
            println!("Seed: {}", config.seed);
            println!();

            let report = run_simulator(config).await;
            println!("{}", report.generate_text());
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("stress", args)) => {
            let copies: usize = arg(args, "copies")?;
            let seed: u64 = arg(args, "seed")?;

            println!("Running stress test...");
            println!("Copies: {copies}");
            println!();

            let report = run_stress(copies, seed).await;
            println!("Stress Test Report:");
            println!("  Copies: {}", report.copies);
            println!("  Executions: {}", report.executions);
            println!("  Successes: {}", report.successes);
            println!("  Duplicates: {}", report.duplicates);
            println!("  Unexpected: {}", report.unexpected);
            println!("  Elapsed: {} ms", report.elapsed_ms);
            println!("  Success: {}", report.passed);
            std::process::exit(if report.passed { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            print!("{}", config.to_toml_string()?);
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}
