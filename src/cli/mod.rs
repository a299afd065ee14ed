//! Command-line parsing for the claim-frequency tool.
//!
//! Parsing stays here; dispatch and orchestration live in `app`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::cv::{DEFAULT_FOLDS, DEFAULT_SEED};
use crate::preprocess::DEFAULT_OTHER_THRESHOLD;
use crate::store::{ENV_ENDPOINT, ENV_NAME};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "cfreq", version, about = "Claim-frequency GLM: cross-validate, publish and serve")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Artifact store: an http(s) registry URL or a local directory.
    #[arg(long, env = ENV_ENDPOINT, global = true, value_name = "ENDPOINT")]
    pub board: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cross-validate the model and print per-fold deviance and coefficients.
    Cv(DataArgs),
    /// Cross-validate, fit on the full data and publish a new bundle version.
    Train(TrainArgs),
    /// Score a JSON file of rows with a published bundle.
    Predict(PredictArgs),
    /// List the published versions of an artifact.
    Versions(NameArgs),
    /// Serve predictions from the latest published bundle over HTTP.
    Serve(ServeArgs),
}

/// Where the observations come from and how the model is fitted.
#[derive(Debug, Args, Clone)]
pub struct DataArgs {
    /// CSV file in freMTPL2freq layout.
    #[arg(long, value_name = "CSV", conflicts_with = "synthetic", required_unless_present = "synthetic")]
    pub data: Option<PathBuf>,

    /// Generate this many synthetic policies instead of reading a file.
    #[arg(long, value_name = "N")]
    pub synthetic: Option<usize>,

    /// Number of folds.
    #[arg(short = 'k', long = "folds", default_value_t = DEFAULT_FOLDS)]
    pub k: usize,

    /// Seed for fold assignment and synthetic data.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Levels below this share of training rows are pooled into `other`.
    #[arg(long, default_value_t = DEFAULT_OTHER_THRESHOLD)]
    pub threshold: f64,

    /// Categorical predictor columns (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub categorical: Option<Vec<String>>,

    /// Numeric predictor columns (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub numeric: Option<Vec<String>>,
}

#[derive(Debug, Args, Clone)]
pub struct NameArgs {
    /// Artifact name in the store.
    #[arg(long, env = ENV_NAME)]
    pub name: String,
}

#[derive(Debug, Args, Clone)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub target: NameArgs,

    /// Skip cross-validation and fit the final model directly.
    #[arg(long)]
    pub skip_cv: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PredictArgs {
    #[command(flatten)]
    pub target: NameArgs,

    /// Version to use (default: latest).
    #[arg(long)]
    pub version: Option<u64>,

    /// JSON file holding an array of row objects.
    #[arg(long, value_name = "JSON")]
    pub rows: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub target: NameArgs,

    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: String,

    /// Worker threads answering requests.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
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
    fn parses_train_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cfreq", "train", "--synthetic", "500", "--name", "freq", "-k", "5", "--board", "/tmp/b", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.board.as_deref(), Some("/tmp/b"));
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };
        assert_eq!(args.data.synthetic, Some(500));
        assert_eq!(args.data.k, 5);
        assert_eq!(args.target.name, "freq");
    }

    #[test]
    fn data_source_is_required_and_exclusive() {
        assert!(Cli::try_parse_from(["cfreq", "cv"]).is_err());
        assert!(Cli::try_parse_from(["cfreq", "cv", "--data", "a.csv", "--synthetic", "10"]).is_err());
    }

    #[test]
    fn column_lists_split_on_commas() {
        let cli = Cli::try_parse_from([
            "cfreq", "cv", "--synthetic", "100", "--categorical", "area,region", "--numeric", "density",
        ])
        .unwrap();
        let Command::Cv(args) = cli.command else {
            panic!("expected cv");
        };
        assert_eq!(args.categorical, Some(vec!["area".to_string(), "region".to_string()]));
        assert_eq!(args.numeric, Some(vec!["density".to_string()]));
    }
}
