//! CLI tool for browsing packfs virtual filesystems.

mod commands;
mod exit_codes;
mod output;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use std::path::PathBuf;

use exit_codes::ExitCode;

/// Browse game archives through one virtual filesystem
#[derive(Parser)]
#[command(name = "packfs")]
#[command(author, version, about = "Browse game archives through one virtual filesystem", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Source to mount, as PATH or PATH@MOUNT_POINT (repeatable, lowest precedence last)
    #[arg(long, short = 'm', global = true)]
    mount: Vec<String>,

    /// Follow and list symbolic links
    #[arg(long, global = true)]
    allow_symlinks: bool,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value = "human", global = true)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory (alias: l)
    #[command(alias = "l")]
    Ls {
        /// Virtual directory
        #[arg(default_value = "")]
        dir: String,

        /// Descend into subdirectories
        #[arg(short = 'r', long)]
        recursive: bool,
    },

    /// Show metadata and the providing source of a path
    Stat {
        /// Virtual path
        path: String,
    },

    /// Write a file to standard output
    Cat {
        /// Virtual path
        path: String,
    },

    /// Copy a file or directory tree to a native directory (alias: x)
    #[command(alias = "x")]
    Extract {
        /// Virtual path
        path: String,

        /// Output directory
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,
    },

    /// List supported archive formats
    Formats,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

fn main() {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut std::io::stdout());
        std::process::exit(ExitCode::Success.code());
    }

    let vfs = match commands::build_vfs(&cli.mount, cli.allow_symlinks) {
        Ok(vfs) => vfs,
        Err(code) => std::process::exit(code.code()),
    };

    let exit_code = match cli.command {
        Commands::Ls { dir, recursive } => commands::ls(&vfs, &dir, recursive, cli.format),
        Commands::Stat { path } => commands::stat(&vfs, &path, cli.format),
        Commands::Cat { path } => commands::cat(&vfs, &path),
        Commands::Extract { path, output } => {
            commands::extract(&vfs, &path, &output, cli.format)
        }
        Commands::Formats => commands::formats(&vfs, cli.format),
        Commands::Completions { .. } => ExitCode::Success,
    };

    std::process::exit(exit_code.code());
}
