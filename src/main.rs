//! netpipe - relay bytes between two endpoints, stream or datagram

use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use netpipe::app::{metrics, Runtime};
use netpipe::config::Config;
use netpipe::error::Result;

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    if args.gen_config {
        let json = serde_json::to_string_pretty(&Config::default())
            .map_err(|e| netpipe::Error::Config(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // RUST_LOG wins over the config file
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| config.log.level.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| netpipe::Error::Runtime(format!("Failed to set tracing subscriber: {}", e)))?;

    let (first, second) = match (args.addresses.first(), args.addresses.get(1)) {
        (Some(first), Some(second)) if args.addresses.len() == 2 => (first.clone(), second.clone()),
        _ => {
            eprintln!("Expected exactly two addresses, got {}", args.addresses.len());
            print_help();
            std::process::exit(2);
        }
    };

    if args.metrics {
        metrics::init_metrics();
    }

    info!("netpipe v{} starting...", env!("CARGO_PKG_VERSION"));

    let runtime = Runtime::from_config(config)?;
    // Validation errors surface here, before the async runtime exists
    let (first, second) = runtime.resolve_pair(&first, &second)?;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        runtime
            .run_resolved(&first, &second, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await
    });

    if args.metrics {
        eprint!("{}", metrics::gather_text());
    }

    result?;
    info!("Goodbye!");
    Ok(())
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    gen_config: bool,
    metrics: bool,
    version: bool,
    addresses: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut gen_config = false;
        let mut metrics = false;
        let mut version = false;
        let mut addresses = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--gen-config" => gen_config = true,
                "--metrics" => metrics = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') => addresses.push(arg.to_string()),
                arg => eprintln!("Ignoring unknown option: {}", arg),
            }
            i += 1;
        }

        Self {
            config,
            gen_config,
            metrics,
            version,
            addresses,
        }
    }
}

fn print_help() {
    println!(r#"netpipe - relay bytes between two endpoints

USAGE:
    netpipe [OPTIONS] <ADDRESS1> <ADDRESS2>

ADDRESSES:
    UDP:[host]:port             Send datagrams to host (default 0.0.0.0)
    UDP-LISTEN:[bind]:port      Accept one datagram session
    TCP:[host]:port             Connect to host
    TCP-LISTEN:[bind]:port      Accept one TCP connection

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    --gen-config            Print the default configuration
    --metrics               Dump Prometheus metrics to stderr on exit
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    netpipe UDP-LISTEN:9000 TCP:127.0.0.1:8080
    netpipe -c netpipe.json TCP-LISTEN:127.0.0.1:7000 UDP:10.0.0.2:53
    netpipe --gen-config > netpipe.json
"#);
}

fn print_version() {
    println!("netpipe v{}", env!("CARGO_PKG_VERSION"));
    println!("Stream and datagram endpoint relay");
}
