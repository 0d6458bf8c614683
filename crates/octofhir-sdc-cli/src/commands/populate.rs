use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use octofhir_sdc::{
    CachingExpansionFetcher, Collaborators, ExpansionFetcher, ExpansionRequestConfig,
    ExpressionEvaluator, HttpExpansionFetcher, NoTerminology, PathEvaluator, PopulationContext,
    Populator, Questionnaire, SdcConfig,
};
use serde_json::Value;
use tracing::info;

use crate::cli::{OutputFormat, PopulateArgs};
use crate::output::{print_note, print_outcome};

pub async fn populate(args: &PopulateArgs, config: &SdcConfig, format: OutputFormat) -> Result<()> {
    let questionnaire = load_questionnaire(&args.questionnaire)?;
    let seed = match &args.context {
        Some(path) => load_context(path)?,
        None => PopulationContext::new(),
    };

    let collaborators = Collaborators::new(
        build_evaluator(args).await?,
        build_terminology(args, config)?,
    )
    .with_expansion_config(ExpansionRequestConfig::from(&config.terminology));

    let populator = match args.timeout_ms {
        Some(ms) => Populator::new(Duration::from_millis(ms)),
        None => Populator::from_config(config),
    };

    match populator.populate(&questionnaire, seed, &collaborators).await? {
        Some(outcome) => {
            print_outcome(&outcome, format)?;
            if args.strict && outcome.has_warnings() {
                bail!("Population reported {} issue(s)", outcome.issues.len());
            }
        }
        None => print_note("Questionnaire has nothing to populate"),
    }
    Ok(())
}

pub fn load_questionnaire(path: &str) -> Result<Questionnaire> {
    let json = read_json(path)?;
    Questionnaire::from_json(&json).with_context(|| format!("Invalid Questionnaire: {path}"))
}

fn load_context(path: &str) -> Result<PopulationContext> {
    let Value::Object(bindings) = read_json(path)? else {
        bail!("Context file must be a JSON object of name → resource: {path}");
    };
    Ok(bindings.into_iter().collect())
}

async fn build_evaluator(args: &PopulateArgs) -> Result<Arc<dyn ExpressionEvaluator>> {
    #[cfg(feature = "fhirpath")]
    if args.results.is_none() {
        info!("Using FHIRPath evaluator");
        let evaluator = octofhir_sdc::FhirPathEvaluator::with_default_engine().await?;
        return Ok(Arc::new(evaluator));
    }

    let mut evaluator = PathEvaluator::new();
    if let Some(path) = &args.results {
        let Value::Object(recorded) = read_json(path)? else {
            bail!("Results file must be a JSON object of expression → values: {path}");
        };
        evaluator = evaluator.with_recorded(recorded);
        info!(recorded = evaluator.recorded_len(), "Loaded recorded expression results");
    }
    Ok(Arc::new(evaluator))
}

fn build_terminology(args: &PopulateArgs, config: &SdcConfig) -> Result<Arc<dyn ExpansionFetcher>> {
    if args.no_terminology {
        return Ok(Arc::new(NoTerminology));
    }

    let fetcher = match &args.terminology_server {
        Some(url) => HttpExpansionFetcher::new(url),
        None if config.terminology.enabled => HttpExpansionFetcher::from_config(&config.terminology),
        None => return Ok(Arc::new(NoTerminology)),
    }
    .context("Failed to create terminology client")?;

    info!(server = fetcher.base_url(), "Using remote value set expansion");
    Ok(Arc::new(CachingExpansionFetcher::new(
        fetcher,
        config.terminology.cache_ttl(),
    )))
}

fn read_json(path: &str) -> Result<Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read file: {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {path}"))
}

