use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tally", about = "Import bank statements and categorize transactions.")]
pub struct Cli {
    /// Configuration file (default: platform config dir / tally.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a statement file into an account.
    Import {
        file: PathBuf,
        /// Import format name from the configuration
        #[arg(long)]
        format: String,
        /// Account id to import into
        #[arg(long)]
        account: i64,
        /// Skip the category rules for this import
        #[arg(long = "no-automation")]
        no_automation: bool,
    },
    /// Show which format version a file would be imported with.
    Detect {
        file: PathBuf,
        #[arg(long)]
        format: String,
    },
    /// Run the category rules on stored, uncategorized transactions.
    Categorize {
        /// Limit to one account id
        #[arg(long)]
        account: Option<i64>,
    },
    /// Manage accounts.
    Accounts {
        #[command(subcommand)]
        command: RegistryCommands,
    },
    /// Manage categories.
    Categories {
        #[command(subcommand)]
        command: RegistryCommands,
    },
    /// List recent imports.
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum RegistryCommands {
    Add { name: String },
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_import_with_global_flags() {
        let cli = Cli::try_parse_from([
            "tally",
            "import",
            "jan.csv",
            "--format",
            "sparkasse",
            "--account",
            "3",
            "--no-automation",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Import {
                file,
                format,
                account,
                no_automation,
            } => {
                assert_eq!(file, PathBuf::from("jan.csv"));
                assert_eq!(format, "sparkasse");
                assert_eq!(account, 3);
                assert!(no_automation);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn import_requires_format_and_account() {
        assert!(Cli::try_parse_from(["tally", "import", "jan.csv"]).is_err());
    }
}
