use crate::cli::OutputFormat;
use colored::Colorize;
use octofhir_sdc::{PopulateOutcome, PopulationIssue, QuestionnaireResponseItem};
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => print_error(&format!("Failed to serialize output: {e}")),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_note(msg: &str) {
    eprintln!("{} {}", "•".cyan(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a population outcome.
///
/// `json` writes the response to stdout and the issues, as an
/// OperationOutcome, to stderr.
pub fn print_outcome(outcome: &PopulateOutcome, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            print_json(&outcome.response.to_json()?);
            if let Some(issues) = outcome.operation_outcome() {
                eprintln!("{}", serde_json::to_string_pretty(&issues)?);
            }
        }
        OutputFormat::Summary => {
            let id = outcome.response.id.as_deref().unwrap_or("-");
            println!("{} {}", "QuestionnaireResponse:".cyan(), id.cyan());
            if let Some(questionnaire) = &outcome.response.questionnaire {
                println!("{}: {}", "Questionnaire".cyan(), questionnaire);
            }
            print_items_table(&outcome.response.item);
            print_issues(&outcome.issues);
        }
    }
    Ok(())
}

fn print_items_table(items: &[QuestionnaireResponseItem]) {
    let mut rows = Vec::new();
    collect_rows(items.iter(), 0, &mut rows);
    if rows.is_empty() {
        println!("No items populated.");
        return;
    }

    let mut builder = Builder::default();
    builder.push_record(["LinkId", "Answer"]);
    for (link_id, answer) in rows {
        builder.push_record([link_id, answer]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}

fn collect_rows<'a>(
    items: impl Iterator<Item = &'a QuestionnaireResponseItem>,
    depth: usize,
    rows: &mut Vec<(String, String)>,
) {
    for item in items {
        let answers = item
            .answers()
            .iter()
            .map(|a| describe_answer(&a.value))
            .collect::<Vec<_>>()
            .join(", ");
        let answer = if answers.is_empty() { "-".to_string() } else { answers };
        rows.push((format!("{}{}", "  ".repeat(depth), item.link_id), answer));
        collect_rows(item.children(), depth + 1, rows);
    }
}

fn describe_answer(value: &octofhir_sdc::AnswerValue) -> String {
    if let Some(coding) = value.as_coding() {
        let code = coding.code.as_deref().unwrap_or("?");
        return match &coding.display {
            Some(display) => format!("{code} ({display})"),
            None => code.to_string(),
        };
    }
    if let Some(s) = value.as_string() {
        return s.to_string();
    }
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map
            .values()
            .next()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
        Ok(other) => other.to_string(),
        Err(_) => value.type_name().to_string(),
    }
}

pub fn print_issues(issues: &[PopulationIssue]) {
    if issues.is_empty() {
        print_success("No issues");
        return;
    }
    for issue in issues {
        eprintln!("{} {}", "!".yellow(), issue);
    }
}
