//! Lightweight path evaluator.
//!
//! Understands `%variable(.field | [n] | .function())*` navigation, which
//! covers most population expressions that simply project data out of launch
//! resources. Anything else can be answered from recorded results, which is
//! how the CLI and the tests drive population without a full FHIRPath engine.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::ExpressionEvaluator;
use crate::context::{PopulationContext, into_collection};
use crate::error::EvaluationError;
use crate::expression::Expression;

#[derive(Debug, Clone, Default)]
pub struct PathEvaluator {
    recorded: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Index(usize),
    First,
    Last,
    Count,
    Exists,
    Empty,
}

impl PathEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `expression` with `values` instead of navigating.
    pub fn with_result(
        mut self,
        expression: impl AsRef<str>,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.recorded.insert(
            expression.as_ref().trim().to_string(),
            values.into_iter().collect(),
        );
        self
    }

    /// Add recorded results from a JSON object of `expression → value`.
    ///
    /// Arrays are taken as collections and `null` as the empty collection.
    pub fn with_recorded(mut self, recorded: Map<String, Value>) -> Self {
        for (expression, value) in recorded {
            self.recorded
                .insert(expression.trim().to_string(), into_collection(value));
        }
        self
    }

    pub fn recorded_len(&self) -> usize {
        self.recorded.len()
    }

    fn navigate(
        &self,
        expression: &str,
        context: &PopulationContext,
    ) -> Result<Vec<Value>, EvaluationError> {
        let (variable, steps) = parse(expression)?;
        let root = context
            .get(&variable)
            .ok_or_else(|| EvaluationError::UnknownVariable(variable.clone()))?;

        let mut current = into_collection(root.clone());
        for step in steps {
            current = apply(step, current);
        }
        Ok(current)
    }
}

#[async_trait]
impl ExpressionEvaluator for PathEvaluator {
    async fn evaluate(
        &self,
        expression: &Expression,
        context: &PopulationContext,
    ) -> Result<Vec<Value>, EvaluationError> {
        if let Some(values) = self.recorded.get(expression.expression.trim()) {
            return Ok(values.clone());
        }
        self.navigate(&expression.expression, context)
    }
}

fn apply(step: Step, input: Vec<Value>) -> Vec<Value> {
    match step {
        Step::Field(name) => input
            .iter()
            .filter_map(|value| field(value, &name))
            .flat_map(|value| into_collection(value.clone()))
            .collect(),
        Step::Index(n) => input.into_iter().nth(n).into_iter().collect(),
        Step::First => input.into_iter().next().into_iter().collect(),
        Step::Last => input.into_iter().last().into_iter().collect(),
        Step::Count => vec![Value::from(input.len())],
        Step::Exists => vec![Value::Bool(!input.is_empty())],
        Step::Empty => vec![Value::Bool(input.is_empty())],
    }
}

/// Property lookup with choice-type fallback (`value` finds `valueQuantity`).
fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    let object = value.as_object()?;
    object.get(name).or_else(|| {
        object.iter().find_map(|(key, v)| {
            key.strip_prefix(name)
                .filter(|suffix| suffix.starts_with(|c: char| c.is_ascii_uppercase()))
                .map(|_| v)
        })
    })
}

fn parse(expression: &str) -> Result<(String, Vec<Step>), EvaluationError> {
    let unsupported = || EvaluationError::Unsupported(expression.to_string());

    let rest = expression.trim().strip_prefix('%').ok_or_else(unsupported)?;
    let (variable, mut rest) = match rest.strip_prefix('`') {
        Some(quoted) => {
            let end = quoted.find('`').ok_or_else(unsupported)?;
            (&quoted[..end], &quoted[end + 1..])
        }
        None => split_ident(rest),
    };
    if variable.is_empty() {
        return Err(unsupported());
    }

    let mut steps = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']').ok_or_else(unsupported)?;
            let n = after[..end].trim().parse().map_err(|_| unsupported())?;
            steps.push(Step::Index(n));
            rest = &after[end + 1..];
        } else if let Some(after) = rest.strip_prefix('.') {
            let (ident, after) = split_ident(after);
            if ident.is_empty() {
                return Err(unsupported());
            }
            match after.strip_prefix("()") {
                Some(after_call) => {
                    steps.push(match ident {
                        "first" => Step::First,
                        "last" => Step::Last,
                        "count" => Step::Count,
                        "exists" => Step::Exists,
                        "empty" => Step::Empty,
                        _ => return Err(unsupported()),
                    });
                    rest = after_call;
                }
                None if after.starts_with('(') => return Err(unsupported()),
                None => {
                    steps.push(Step::Field(ident.to_string()));
                    rest = after;
                }
            }
        } else {
            return Err(unsupported());
        }
    }

    Ok((variable.to_string(), steps))
}

fn split_ident(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    s.split_at(end)
}
