//! Command-line interface built on clap.
//!
//! Defines the [`Cli`] struct with subcommands [`Command`] (extract, demo)
//! and global flags (--mode, --concurrency, --max-attempts, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::batch::ExtractionMode;

/// papermeta — concurrent academic-paper metadata extraction.
#[derive(Debug, Parser)]
#[command(name = "papermeta", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Extraction mode selecting which field record to build.
    #[arg(long, global = true)]
    pub mode: Option<ModeArg>,

    /// Maximum in-flight extraction calls.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Attempts per document before giving up.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Mode argument accepted by the CLI, mapped to
/// [`ExtractionMode`](crate::batch::ExtractionMode) internally.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Springer Nature submission sheet.
    Sn,
    /// IEEE order sheet.
    Ieee,
    /// Funding collection sheet.
    Funding,
    /// Author-profile sheet.
    Ap,
}

impl From<ModeArg> for ExtractionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Sn => ExtractionMode::Sn,
            ModeArg::Ieee => ExtractionMode::Ieee,
            ModeArg::Funding => ExtractionMode::Funding,
            ModeArg::Ap => ExtractionMode::Ap,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract metadata from document text files or a directory of them.
    Extract {
        /// Text files (or one directory of .txt files) to process.
        paths: Vec<PathBuf>,

        /// Write the JSON report here instead of results/.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run the built-in pipeline demonstration against a simulated service.
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_extract_subcommand() {
        let cli = Cli::parse_from(["papermeta", "extract", "papers/a.txt", "papers/b.txt"]);
        match cli.command {
            Command::Extract { paths, output } => {
                assert_eq!(paths.len(), 2);
                assert!(output.is_none());
            }
            _ => panic!("expected Extract command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "papermeta",
            "--mode",
            "ieee",
            "--concurrency",
            "4",
            "--max-attempts",
            "5",
            "--verbose",
            "demo",
        ]);
        assert!(cli.verbose);
        assert!(matches!(cli.mode, Some(ModeArg::Ieee)));
        assert_eq!(cli.concurrency, Some(4));
        assert_eq!(cli.max_attempts, Some(5));
    }

    #[test]
    fn mode_arg_maps_to_extraction_mode() {
        assert_eq!(ExtractionMode::from(ModeArg::Sn), ExtractionMode::Sn);
        assert_eq!(ExtractionMode::from(ModeArg::Ap), ExtractionMode::Ap);
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
