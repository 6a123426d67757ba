#![forbid(unsafe_code)]

//! `matrix-exec -p "<preloads>" [-l <libpath>] -- <cmd...>`
//!
//! Replaces itself with `cmd` after setting `LD_PRELOAD` and extending
//! `LD_LIBRARY_PATH`, so the preload list is exactly the one given here.

use std::os::unix::process::CommandExt;
use std::process::Command;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "matrix-exec")]
#[command(about = "Exec a command with an explicit preload list", long_about = None)]
struct Cli {
    /// Space separated shared objects for LD_PRELOAD
    #[arg(short = 'p', long, default_value = "", allow_hyphen_values = true)]
    preload: String,
    /// Appended to LD_LIBRARY_PATH
    #[arg(short = 'l', long)]
    library_path: Option<String>,
    /// Command and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    cmd: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let Some((program, args)) = cli.cmd.split_first() else {
        eprintln!("matrix-exec: no command given");
        std::process::exit(2);
    };

    let mut cmd = Command::new(program);
    cmd.args(args);

    let preload = cli.preload.split_whitespace().collect::<Vec<_>>().join(" ");
    if preload.is_empty() {
        cmd.env_remove("LD_PRELOAD");
    } else {
        cmd.env("LD_PRELOAD", preload);
    }

    if let Some(lib) = cli.library_path.filter(|l| !l.is_empty()) {
        let joined = match std::env::var("LD_LIBRARY_PATH") {
            Ok(current) if !current.is_empty() && current != lib => format!("{current}:{lib}"),
            _ => lib,
        };
        cmd.env("LD_LIBRARY_PATH", joined);
    }

    // only returns on failure
    let err = cmd.exec();
    eprintln!("matrix-exec: {program}: {err}");
    std::process::exit(127);
}
