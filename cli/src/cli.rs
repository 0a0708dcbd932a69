use clap::{Parser, Subcommand, ValueEnum};

use market::types::OptionType;

#[derive(Debug, Parser)]
#[command(name = "optflow", version, about = "Options snapshot log and unusual-volume monitor")]
pub struct Cli {
    /// Overrides the snapshot database location.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the background refresh loop until ctrl-c.
    Run,

    /// Take one snapshot now and report unusual volume against the previous one.
    Fetch {
        /// Ignore a fresh quote cache and refetch every symbol.
        #[arg(long)]
        force: bool,
    },

    /// Show recorded contracts, highest volume first.
    ///
    /// Filters repeat or take comma-separated lists; a row matches any listed value.
    Flow {
        #[arg(long, value_delimiter = ',')]
        symbol: Vec<String>,

        #[arg(long = "type", value_enum, value_delimiter = ',')]
        option_type: Vec<ContractTypeArg>,

        #[arg(long, value_delimiter = ',')]
        expiry: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        strike: Vec<f64>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Compare the two most recent snapshots.
    Unusual {
        /// Minimum current/previous volume ratio.
        #[arg(long)]
        ratio: Option<f64>,

        /// Minimum absolute volume increase.
        #[arg(long)]
        delta: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContractTypeArg {
    Call,
    Put,
}

impl From<ContractTypeArg> for OptionType {
    fn from(arg: ContractTypeArg) -> Self {
        match arg {
            ContractTypeArg::Call => OptionType::Call,
            ContractTypeArg::Put => OptionType::Put,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flow_filters() {
        let cli = Cli::try_parse_from([
            "optflow", "flow", "--symbol", "NVDA", "--type", "put", "--limit", "10",
        ])
        .unwrap();

        match cli.command {
            Command::Flow {
                symbol,
                option_type,
                expiry,
                strike,
                limit,
            } => {
                assert_eq!(symbol, vec!["NVDA"]);
                assert_eq!(option_type, vec![ContractTypeArg::Put]);
                assert!(expiry.is_empty());
                assert!(strike.is_empty());
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn flow_filters_repeat_and_split_on_commas() {
        let cli = Cli::try_parse_from([
            "optflow", "flow", "--symbol", "NVDA,TSLA", "--symbol", "AAPL", "--type", "call,put",
            "--expiry", "2024-01-19", "--strike", "500", "--strike", "182.5,250",
        ])
        .unwrap();

        match cli.command {
            Command::Flow {
                symbol,
                option_type,
                expiry,
                strike,
                limit,
            } => {
                assert_eq!(symbol, vec!["NVDA", "TSLA", "AAPL"]);
                assert_eq!(
                    option_type.into_iter().map(OptionType::from).collect::<Vec<_>>(),
                    vec![OptionType::Call, OptionType::Put]
                );
                assert_eq!(expiry, vec!["2024-01-19"]);
                assert_eq!(strike, vec![500.0, 182.5, 250.0]);
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_strike() {
        assert!(Cli::try_parse_from(["optflow", "flow", "--strike", "atm"]).is_err());
    }

    #[test]
    fn fetch_defaults_to_reusing_the_cache() {
        let cli = Cli::try_parse_from(["optflow", "fetch"]).unwrap();
        assert!(matches!(cli.command, Command::Fetch { force: false }));

        let cli = Cli::try_parse_from(["optflow", "fetch", "--force"]).unwrap();
        assert!(matches!(cli.command, Command::Fetch { force: true }));
    }

    #[test]
    fn global_database_url_is_accepted_after_the_subcommand() {
        let cli =
            Cli::try_parse_from(["optflow", "unusual", "--database-url", "sqlite::memory:"])
                .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn rejects_unknown_contract_type() {
        assert!(Cli::try_parse_from(["optflow", "flow", "--type", "straddle"]).is_err());
    }
}
