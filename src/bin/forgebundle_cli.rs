//! ForgeBundle CLI
//!
//! Commands: build, rules, transform, instrument
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on a failed build cycle

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use forgebundle_core::{
    coordinator::transform_text, instrument, BuildConfig, BuildCoordinator, InstrumentOptions,
    Mode, ModuleGraph, TransformerRegistry,
};

#[derive(Parser)]
#[command(name = "forgebundle-cli")]
#[command(about = "ForgeBundle CLI - Module Transform Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the build configuration file
    #[arg(short, long, global = true, default_value = "forgebundle.json")]
    config: PathBuf,

    /// Build mode, overrides the configuration file
    #[arg(short, long, global = true, env = "FORGEBUNDLE_MODE")]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one build cycle over a module graph
    Build {
        /// Module graph JSON produced by the resolver
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// List compiled rules and their execution order
    Rules,

    /// Run the chain matching PATH over a file (or stdin)
    Transform {
        /// Module path used for rule matching and provenance
        #[arg(short, long)]
        path: String,

        /// Input file; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Instrument logging calls in a file (or stdin) with default options
    Instrument {
        /// Source path to embed
        #[arg(short, long)]
        path: String,

        /// Input file; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn read_input(file: &Option<PathBuf>) -> std::io::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn fail(error: impl std::fmt::Display) -> ExitCode {
    let output = serde_json::json!({
        "success": false,
        "error": error.to_string(),
    });
    println!("{}", output);
    ExitCode::FAILURE
}

fn load_coordinator(cli: &Cli) -> Result<BuildCoordinator, forgebundle_core::BuildError> {
    let config = BuildConfig::load(&cli.config)?;
    BuildCoordinator::from_config(&config, cli.mode, &TransformerRegistry::with_builtins())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Instrument { path, file } => {
            let input = match read_input(file) {
                Ok(input) => input,
                Err(e) => return fail(e),
            };
            print!("{}", instrument(&input, path, &InstrumentOptions::default()));
            ExitCode::SUCCESS
        }

        Commands::Rules => {
            let coordinator = match load_coordinator(&cli) {
                Ok(c) => c,
                Err(e) => return fail(e),
            };
            let rules: Vec<_> = coordinator
                .matcher()
                .rules()
                .iter()
                .map(|r| r.summary())
                .collect();
            match serde_json::to_string_pretty(&rules) {
                Ok(body) => {
                    println!("{}", body);
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }

        Commands::Transform { path, file } => {
            let coordinator = match load_coordinator(&cli) {
                Ok(c) => c,
                Err(e) => return fail(e),
            };
            let input = match read_input(file) {
                Ok(input) => input,
                Err(e) => return fail(e),
            };
            match transform_text(&coordinator, path, input.clone()).await {
                Ok(Some(output)) => {
                    print!("{}", output);
                    ExitCode::SUCCESS
                }
                // No rule: pass-through
                Ok(None) => {
                    print!("{}", input);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    println!("{}", serde_json::json!({"success": false, "error": e.to_diagnostic()}));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Build { graph } => {
            let coordinator = match load_coordinator(&cli) {
                Ok(c) => c,
                Err(e) => return fail(e),
            };
            let graph = match ModuleGraph::load(graph) {
                Ok(g) => g,
                Err(e) => return fail(e),
            };

            let report = coordinator.run(&graph).await;
            match serde_json::to_string_pretty(&report) {
                Ok(body) => println!("{}", body),
                Err(e) => return fail(e),
            }
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2) // Failed cycle
            }
        }
    }
}
