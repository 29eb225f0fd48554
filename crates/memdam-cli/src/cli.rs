use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "memdam",
    about = "memdam: record, query and archive personal events",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root folder of the source stores, overriding the config
    #[arg(long, global = true)]
    pub source: Option<PathBuf>,

    /// Root folder of the destination stores, overriding the config
    #[arg(long, global = true)]
    pub destination: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Move events and blobs from the source stores to the destination
    Sync(SyncArgs),
    /// Print events matching a query as JSON lines
    Find(FindArgs),
    /// Print one event
    Get(GetArgs),
    /// Delete one event
    Delete(DeleteArgs),
    /// Save events from a JSON array file into the source store
    Import(ImportArgs),
}

#[derive(Args)]
pub struct SyncArgs {
    /// Drain what is pending on this thread, then exit
    #[arg(long, conflicts_with = "duration")]
    pub once: bool,
    /// Run in the background for this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

/// Which store pair a read or delete targets.
#[derive(Args)]
pub struct StoreSelection {
    /// Use the destination stores instead of the source
    #[arg(long)]
    pub archived: bool,
}

#[derive(Args)]
pub struct FindArgs {
    #[arg(long)]
    pub namespace: Option<String>,
    /// Sort key as FIELD or FIELD:desc, repeatable
    #[arg(short, long)]
    pub order: Vec<OrderArg>,
    #[arg(short = 'n', long)]
    pub limit: Option<u64>,
    /// Query JSON, combined with the other flags
    #[arg(short, long)]
    pub query: Option<String>,
    #[command(flatten)]
    pub store: StoreSelection,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
    #[command(flatten)]
    pub store: StoreSelection,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: String,
    #[command(flatten)]
    pub store: StoreSelection,
}

#[derive(Args)]
pub struct ImportArgs {
    pub file: PathBuf,
}

/// A `FIELD[:asc|:desc]` sort key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderArg {
    pub field: String,
    pub ascending: bool,
}

impl FromStr for OrderArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, ascending) = match s.rsplit_once(':') {
            Some((field, "asc")) => (field, true),
            Some((field, "desc")) => (field, false),
            Some((_, dir)) => return Err(format!("unknown sort direction {dir:?}")),
            None => (s, true),
        };
        if field.is_empty() {
            return Err("empty sort field".into());
        }
        Ok(Self {
            field: field.to_string(),
            ascending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn order_args() {
        assert_eq!(
            "time__time:desc".parse::<OrderArg>().unwrap(),
            OrderArg {
                field: "time__time".into(),
                ascending: false
            }
        );
        assert!("x__number".parse::<OrderArg>().unwrap().ascending);
        assert!("x__number:up".parse::<OrderArg>().is_err());
        assert!(":desc".parse::<OrderArg>().is_err());
    }

    #[test]
    fn once_and_duration_conflict() {
        assert!(Cli::try_parse_from(["memdam", "sync", "--once", "--duration", "5"]).is_err());
        let cli = Cli::try_parse_from(["memdam", "find", "-n", "3", "--order", "a__long:desc", "--archived"]).unwrap();
        match cli.command {
            Command::Find(args) => {
                assert_eq!(args.limit, Some(3));
                assert!(args.store.archived);
                assert!(!args.order[0].ascending);
            }
            _ => panic!("expected find"),
        }
    }
}
