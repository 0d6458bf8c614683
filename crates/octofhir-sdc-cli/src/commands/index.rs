use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_sdc::{ExpressionIndex, Questionnaire};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;
use crate::output::print_json;

pub fn index(questionnaire_path: &str, format: OutputFormat) -> Result<()> {
    let questionnaire = super::populate::load_questionnaire(questionnaire_path)?;
    let index = ExpressionIndex::build(&questionnaire);

    match format {
        OutputFormat::Json => {
            print_json(&serde_json::to_value(&index).context("Failed to serialize index")?);
        }
        OutputFormat::Summary => print_summary(&questionnaire, &index),
    }
    Ok(())
}

fn print_summary(questionnaire: &Questionnaire, index: &ExpressionIndex) {
    if index.is_empty() {
        println!("No population expressions found.");
        return;
    }

    let mut builder = Builder::default();
    builder.push_record(["LinkId", "Kind", "Expression"]);
    for (name, entry) in &index.population_contexts {
        builder.push_record([
            entry.owner_link_id.clone(),
            format!("context %{name}"),
            entry.expression.expression.clone(),
        ]);
    }
    for (link_id, expression) in &index.initial_expressions {
        builder.push_record([
            link_id.clone(),
            "initial".to_string(),
            expression.expression.clone(),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));

    if !questionnaire.launch_contexts.is_empty() {
        let names: Vec<String> = questionnaire
            .launch_contexts
            .iter()
            .map(|c| format!("%{}", c.name))
            .collect();
        println!("{}: {}", "Launch contexts".cyan(), names.join(", "));
    }
    if !questionnaire.variables.is_empty() {
        let names: Vec<String> = questionnaire
            .variables
            .iter()
            .filter_map(|v| v.name.as_deref().map(|n| format!("%{n}")))
            .collect();
        println!("{}: {}", "Variables".cyan(), names.join(", "));
    }
}
