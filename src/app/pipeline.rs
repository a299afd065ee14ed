//! Shared training workflow used by `cfreq cv` and `cfreq train`.
//!
//! data source -> pipeline spec -> cross-validation -> final fit

use crate::bundle::Bundle;
use crate::cli::DataArgs;
use crate::cv::{CvConfig, CvReport, cross_validate};
use crate::data::{generate_portfolio, load_observations};
use crate::domain::Observation;
use crate::error::{AppError, ErrorKind};
use crate::glm::GlmOptions;
use crate::preprocess::PipelineSpec;

/// Observations plus a label describing where they came from.
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub observations: Vec<Observation>,
    pub source: String,
}

/// Build the pipeline spec requested on the command line.
pub fn pipeline_spec(args: &DataArgs) -> Result<PipelineSpec, AppError> {
    let mut spec = PipelineSpec::default();
    if let Some(cols) = &args.categorical {
        spec.categorical = cols.clone();
    }
    if let Some(cols) = &args.numeric {
        spec.numeric = cols.clone();
    }
    spec.other_threshold = args.threshold;
    spec.validate()?;
    Ok(spec)
}

/// Load the CSV or generate the synthetic portfolio.
pub fn load_data(args: &DataArgs, spec: &PipelineSpec) -> Result<TrainingData, AppError> {
    if let Some(n) = args.synthetic {
        let observations = generate_portfolio(n, args.seed)?;
        return Ok(TrainingData {
            observations,
            source: format!("synthetic portfolio (seed {})", args.seed),
        });
    }

    let path = args
        .data
        .as_deref()
        .ok_or_else(|| AppError::new(ErrorKind::InvalidInput, "Pass --data or --synthetic."))?;
    let ingested = load_observations(path, &spec.categorical, &spec.numeric)?;
    if !ingested.row_errors.is_empty() {
        log::warn!(
            "{}: skipped {} of {} rows",
            path.display(),
            ingested.row_errors.len(),
            ingested.rows_read
        );
    }
    log::info!("{}: using {} rows", path.display(), ingested.rows_used());
    Ok(TrainingData {
        observations: ingested.observations,
        source: path.display().to_string(),
    })
}

/// Cross-validate the bundle fit on `data`.
pub fn run_cv(data: &[Observation], spec: &PipelineSpec, config: &CvConfig) -> Result<CvReport, AppError> {
    let opts = GlmOptions::default();
    cross_validate(data, config, |analysis: &[Observation]| Bundle::fit(spec, analysis, &opts))
}

/// Fit the bundle that gets published, on every observation.
pub fn fit_final(data: &[Observation], spec: &PipelineSpec) -> Result<Bundle, AppError> {
    let bundle = Bundle::fit(spec, data, &GlmOptions::default())?;
    log::info!(
        "final fit: {} features, {} IRLS iterations",
        bundle.pipeline().feature_names().len(),
        bundle.model().iterations()
    );
    Ok(bundle)
}
