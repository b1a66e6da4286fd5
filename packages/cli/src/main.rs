use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// hotmod - dispatch extension points through layered hot overrides
#[derive(Parser, Debug)]
#[command(name = "hotmod")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level unless HOTMOD_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invoke one extension point and print its JSON result
    Dispatch {
        /// Extension point to invoke
        name: String,

        /// Arguments, one JSON value each
        args: Vec<String>,

        /// Manifest declaring the extension points
        #[arg(long, value_name = "FILE")]
        manifest: PathBuf,

        /// Service-scope overrides
        #[arg(long, value_name = "FILE")]
        service: Option<PathBuf>,

        /// Configuration-scope overrides
        #[arg(long, value_name = "FILE")]
        configuration: Option<PathBuf>,

        /// Identifier the configuration overrides are cached under
        #[arg(long, default_value = "default")]
        configuration_id: String,

        /// Request-scope overrides
        #[arg(long, value_name = "FILE")]
        request: Option<PathBuf>,

        /// JSON document used as the protected state
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,

        /// JSON object of fixed host default results by extension point
        #[arg(long, value_name = "FILE")]
        defaults: Option<PathBuf>,

        /// Runtime configuration
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Validate override payloads against a manifest and compile them
    Check {
        #[arg(long, value_name = "FILE")]
        manifest: PathBuf,

        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Payload files to check
        #[arg(required = true)]
        payloads: Vec<PathBuf>,
    },
}

fn setup_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("HOTMOD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Dispatch {
            name,
            args,
            manifest,
            service,
            configuration,
            configuration_id,
            request,
            state,
            defaults,
            config,
        } => {
            let output = commands::dispatch(commands::DispatchRequest {
                manifest,
                name,
                args,
                service,
                configuration,
                configuration_id,
                request,
                state,
                defaults,
                config,
            })
            .await?;
            println!("{output}");
        }
        Command::Check {
            manifest,
            config,
            payloads,
        } => {
            for line in commands::check(&manifest, &payloads, config.as_deref())? {
                println!("{line}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_tracing(args.verbose);

    if let Err(e) = run(args.command).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
