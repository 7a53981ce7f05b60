use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "spindle")]
#[command(
    about = "Incremental backup onto a sequence of fixed-capacity discs",
    long_about = "Watches a directory and copies every new or changed file into a \
                  staging area. When the staged files plus the manifest outgrow the \
                  configured disc size, the disc is sealed and handed to a hook that \
                  turns it into an image."
)]
pub struct Cli {
    /// Working directory of the repository (defaults to the current directory)
    #[arg(short, long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Terse output suitable for cron mail
    #[arg(short, long, global = true)]
    pub cronmode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new repository in --workdir watching WATCH_DIR
    Init { watch_dir: PathBuf },
    /// Copy new and changed files, rotating discs as they fill up
    Monitor,
    /// Show the current disc and repository totals
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every disc with its state and contents
    Discs,
    /// Mark a sealed disc as lost so its files are copied again
    Lost {
        disc_id: i64,
        /// Only mark the disc; leave re-copying to the next monitor run
        #[arg(long)]
        no_refresh: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["spindle", "monitor", "-c", "-w", "/srv/backup"]);
        assert!(cli.cronmode);
        assert_eq!(cli.workdir, Some(PathBuf::from("/srv/backup")));
        assert!(matches!(cli.command, Some(Commands::Monitor)));
    }

    #[test]
    fn test_lost_arguments() {
        let cli = Cli::parse_from(["spindle", "lost", "3", "--no-refresh"]);
        match cli.command {
            Some(Commands::Lost {
                disc_id,
                no_refresh,
            }) => {
                assert_eq!(disc_id, 3);
                assert!(no_refresh);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
