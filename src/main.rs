#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

use matrix_bench::run_cmd::RunArgs;
use matrix_bench::{perms_cmd, run_cmd, show_cmd};

#[derive(Parser, Debug)]
#[command(name = "matrix-bench")]
#[command(about = "Run benchmarks across targets and a parameter space", long_about = None)]
struct Cli {
    /// Enable verbose logging (or set MATRIX_BENCH_LOG)
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a benchmark against every target
    Run {
        /// Benchmark definition (.toml, .yaml or .json)
        #[arg(long)]
        benchmark: PathBuf,
        /// Targets file with [[target]] entries
        #[arg(long)]
        targets: PathBuf,
        /// Number of repetitions
        #[arg(long, default_value_t = 3)]
        runs: usize,
        /// Only run these targets (repeatable)
        #[arg(long = "target")]
        only: Vec<String>,
        /// Load previous results from the result directory first
        #[arg(long)]
        load: bool,
        /// Save results to the result directory afterwards
        #[arg(long)]
        save: bool,
        /// Directory holding built benchmarks (<dir>/benchmarks/<name>)
        #[arg(long, default_value = "build")]
        build_dir: PathBuf,
        /// Directory for result files
        #[arg(long, default_value = "results")]
        result_dir: PathBuf,
        /// Path to the matrix-exec wrapper (default: next to this binary)
        #[arg(long)]
        exec_wrapper: Option<PathBuf>,
        /// Shared object preloaded into every benchmark process (repeatable)
        #[arg(long = "preload")]
        preloads: Vec<String>,
    },

    /// Print statistics of a saved result file
    Show {
        /// Result file (<result_dir>/<benchmark>.json)
        file: PathBuf,
        /// Also print recorded facts
        #[arg(long)]
        facts: bool,
    },

    /// List the permutations of a benchmark's parameter space
    Perms {
        /// Benchmark definition
        #[arg(long)]
        benchmark: PathBuf,
        /// Only permutations with dim=value (repeatable)
        #[arg(long)]
        fix: Vec<String>,
        /// CPU count used for thread scaling (default: this host)
        #[arg(long)]
        cpus: Option<usize>,
    },
}

fn init_tracing(verbose: bool) {
    let env = std::env::var("MATRIX_BENCH_LOG").unwrap_or_else(|_| {
        if verbose { "matrix_bench=debug".to_string() } else { "matrix_bench=info".to_string() }
    });
    let _ = tracing_subscriber::fmt()
        .with_span_events(FmtSpan::ACTIVE)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_env_filter(EnvFilter::new(env))
        .try_init();
}

fn main() {
    color_eyre::install().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            benchmark,
            targets,
            runs,
            only,
            load,
            save,
            build_dir,
            result_dir,
            exec_wrapper,
            preloads,
        } => run_cmd::run(RunArgs {
            benchmark,
            targets,
            runs,
            only,
            load,
            save,
            build_dir,
            result_dir,
            exec_wrapper,
            preloads,
        })
        .map(|_| ()),
        Commands::Show { file, facts } => show_cmd::run(file, facts),
        Commands::Perms { benchmark, fix, cpus } => perms_cmd::run(benchmark, fix, cpus),
    };

    if let Err(e) = result {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
