//! Top-level application orchestration.
//!
//! `src/main.rs` only maps the result to an exit code; this module is the
//! real main: it loads `.env`, parses arguments, sets up logging, opens the
//! artifact store and dispatches the subcommand.

use std::path::Path;

use clap::Parser;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use crate::cli::{Cli, Command, DataArgs, NameArgs, PredictArgs, ServeArgs, TrainArgs};
use crate::cv::CvConfig;
use crate::domain::RawRow;
use crate::error::{AppError, ErrorKind};
use crate::serve::PredictionService;
use crate::store::{ArtifactStore, Credential, ENV_ENDPOINT, StoreConfig};

pub mod pipeline;

/// Entry point for the `cfreq` binary.
pub fn run() -> Result<(), AppError> {
    // Load .env before clap reads its env fallbacks.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let board = cli.board.as_deref();
    match cli.command {
        Command::Cv(args) => handle_cv(&args),
        Command::Train(args) => handle_train(board, &args),
        Command::Predict(args) => handle_predict(board, &args),
        Command::Versions(args) => handle_versions(board, &args),
        Command::Serve(args) => handle_serve(board, &args),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let config = ConfigBuilder::new()
        .add_filter_allow_str("claim_freq")
        .build();
    // A logger may already be installed when running under a test harness.
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
}

fn open_store(board: Option<&str>, name: &str) -> Result<ArtifactStore, AppError> {
    let endpoint = board.ok_or_else(|| {
        AppError::new(
            ErrorKind::InvalidInput,
            format!("No artifact store configured; pass --board or set {ENV_ENDPOINT}."),
        )
    })?;
    let config = StoreConfig::new(endpoint, Credential::from_env(), name)?;
    ArtifactStore::open(&config)
}

fn cv_config(args: &DataArgs) -> CvConfig {
    CvConfig {
        k: args.k,
        seed: args.seed,
    }
}

fn handle_cv(args: &DataArgs) -> Result<(), AppError> {
    let spec = pipeline::pipeline_spec(args)?;
    let data = pipeline::load_data(args, &spec)?;
    let report = pipeline::run_cv(&data.observations, &spec, &cv_config(args))?;
    println!("{}", crate::report::format_cv_summary(&report, &data.source));
    Ok(())
}

fn handle_train(board: Option<&str>, args: &TrainArgs) -> Result<(), AppError> {
    let name = &args.target.name;
    // Open the store first so a bad endpoint or missing credential fails
    // before any fitting work.
    let store = open_store(board, name)?;

    let spec = pipeline::pipeline_spec(&args.data)?;
    let data = pipeline::load_data(&args.data, &spec)?;
    if !args.skip_cv {
        let report = pipeline::run_cv(&data.observations, &spec, &cv_config(&args.data))?;
        println!("{}", crate::report::format_cv_summary(&report, &data.source));
    }

    let bundle = pipeline::fit_final(&data.observations, &spec)?;
    let meta = store.publish(name, &bundle)?;
    println!("{}", crate::report::format_model(&bundle, Some(&meta)));
    Ok(())
}

fn handle_predict(board: Option<&str>, args: &PredictArgs) -> Result<(), AppError> {
    let rows = read_rows(&args.rows)?;
    let store = open_store(board, &args.target.name)?;
    let bundle = store.retrieve(&args.target.name, args.version)?;
    let preds = bundle.predict(&rows)?;
    let json = serde_json::to_string(&preds)
        .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Failed to encode predictions: {e}")))?;
    println!("{json}");
    Ok(())
}

fn handle_versions(board: Option<&str>, args: &NameArgs) -> Result<(), AppError> {
    let store = open_store(board, &args.name)?;
    let versions = store.versions(&args.name)?;
    print!("{}", crate::report::format_versions(&args.name, &versions));
    Ok(())
}

fn handle_serve(board: Option<&str>, args: &ServeArgs) -> Result<(), AppError> {
    let store = open_store(board, &args.target.name)?;
    let service = PredictionService::start(&store, &args.target.name)?;
    let handle = service.spawn(&args.addr, args.workers)?;
    eprintln!("listening on http://{}", handle.addr());
    handle.join()
}

fn read_rows(path: &Path) -> Result<Vec<RawRow>, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Failed to read '{}': {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| {
        AppError::new(
            ErrorKind::InvalidInput,
            format!("'{}' is not a JSON array of row objects: {e}", path.display()),
        )
    })
}
