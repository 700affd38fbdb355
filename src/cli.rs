//! CLI surface (spec.md §6): `moped serve`, `moped ls`, `moped probe`.
//! Grounded on the original draft's `Cli { proxy: Option<String> }`
//! shape, generalized to `clap`'s derive `Subcommand` pattern the way a
//! multi-verb tool names it.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use crate::config;

#[derive(Parser)]
#[command(name = "moped", version, about = "A protocol-compatible MPD server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server (the default when no subcommand is given).
    Serve {
        #[arg(short = 'a', long, default_value = "127.0.0.1:6601")]
        address: String,
        #[arg(short = 'c', long)]
        config: Option<Utf8PathBuf>,
        #[arg(short = 'L', long, default_value = "info")]
        log_level: String,
    },
    /// List the entries at a library path (empty path lists mounts).
    Ls {
        #[arg(default_value = "")]
        path: String,
        #[arg(short = 'c', long)]
        config: Option<Utf8PathBuf>,
    },
    /// Probe one file with ffprobe and print what was found.
    Probe { path: Utf8PathBuf },
}

impl Commands {
    pub fn config_path(&self) -> Utf8PathBuf {
        match self {
            Commands::Serve { config: Some(p), .. } | Commands::Ls { config: Some(p), .. } => {
                p.clone()
            }
            _ => config::default_config_path(),
        }
    }
}
