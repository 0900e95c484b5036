//! Koala unified CLI tool
//!
//! Single command-line interface for the toolchain: package compilation,
//! image execution, and image inspection.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "koala")]
#[command(about = "Koala programming language toolchain")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a package directory into a KLC image
    #[command(alias = "b")]
    Build {
        /// Package directory containing .kl sources
        dir: PathBuf,
        /// Output directory for the image
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Load a KLC image and run it
    #[command(alias = "r")]
    Run {
        /// Path to the .klc image
        image: PathBuf,
    },
    /// Disassemble a KLC image
    #[command(alias = "d")]
    Dis {
        /// Path to the .klc image
        image: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Build { dir, out } => commands::build::run(&dir, &out),
        Commands::Run { image } => commands::run::run(&image),
        Commands::Dis { image } => commands::dis::run(&image),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("koala: {message}");
            ExitCode::FAILURE
        }
    }
}
