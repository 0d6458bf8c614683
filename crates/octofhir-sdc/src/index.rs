//! Expression index.
//!
//! One pre-order walk over the definition tree that records where the
//! population expressions live. Nothing is evaluated here.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::expression::Expression;
use crate::questionnaire::{Questionnaire, QuestionnaireItem};

/// A named population context and the item that declares it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationContextEntry {
    pub owner_link_id: String,
    pub expression: Expression,
}

/// Flat lookup tables for initial expressions and population contexts.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionIndex {
    /// linkId → initial expression
    pub initial_expressions: IndexMap<String, Expression>,

    /// context name → declaring item and expression
    pub population_contexts: IndexMap<String, PopulationContextEntry>,
}

impl ExpressionIndex {
    pub fn build(questionnaire: &Questionnaire) -> Self {
        let mut index = Self::default();
        for item in &questionnaire.items {
            index.visit(item);
        }
        debug!(
            initial_expressions = index.initial_expressions.len(),
            population_contexts = index.population_contexts.len(),
            "Built expression index"
        );
        index
    }

    fn visit(&mut self, item: &QuestionnaireItem) {
        if let Some(expression) = &item.initial_expression {
            self.initial_expressions
                .entry(item.link_id.clone())
                .or_insert_with(|| expression.clone());
        }

        if let Some(expression) = &item.population_context
            && let Some(name) = &expression.name
        {
            if self.population_contexts.contains_key(name) {
                debug!(
                    context = %name,
                    link_id = %item.link_id,
                    "Duplicate population context name ignored"
                );
            } else {
                self.population_contexts.insert(
                    name.clone(),
                    PopulationContextEntry {
                        owner_link_id: item.link_id.clone(),
                        expression: expression.clone(),
                    },
                );
            }
        }

        for child in &item.items {
            self.visit(child);
        }
    }

    pub fn initial_expression(&self, link_id: &str) -> Option<&Expression> {
        self.initial_expressions.get(link_id)
    }

    pub fn population_context(&self, name: &str) -> Option<&PopulationContextEntry> {
        self.population_contexts.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.initial_expressions.is_empty() && self.population_contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{INITIAL_EXPRESSION_URL, ITEM_POPULATION_CONTEXT_URL};
    use serde_json::{Value, json};

    fn initial(expr: &str) -> Value {
        json!([{
            "url": INITIAL_EXPRESSION_URL,
            "valueExpression": {"language": "text/fhirpath", "expression": expr}
        }])
    }

    fn context(name: &str, expr: &str) -> Value {
        json!([{
            "url": ITEM_POPULATION_CONTEXT_URL,
            "valueExpression": {"name": name, "language": "text/fhirpath", "expression": expr}
        }])
    }

    #[test]
    fn test_build_index() {
        let q = Questionnaire::from_json(&json!({
            "resourceType": "Questionnaire",
            "item": [
                {"linkId": "age", "type": "integer", "extension": initial("%patient.birthDate.toAge()")},
                {
                    "linkId": "conditions",
                    "type": "group",
                    "repeats": true,
                    "extension": context("ConditionRepeat", "%Conditions.entry.resource"),
                    "item": [
                        {"linkId": "code", "type": "coding", "extension": initial("%ConditionRepeat.code")},
                        {"linkId": "note", "type": "string"}
                    ]
                },
                {
                    "linkId": "other",
                    "type": "group",
                    "extension": context("ConditionRepeat", "%Other")
                }
            ]
        }))
        .unwrap();

        let index = ExpressionIndex::build(&q);
        assert_eq!(index.initial_expressions.len(), 2);
        assert!(index.initial_expression("note").is_none());

        // First declaration wins
        let entry = index.population_context("ConditionRepeat").unwrap();
        assert_eq!(entry.owner_link_id, "conditions");
        assert_eq!(index.population_contexts.len(), 1);
    }

    #[test]
    fn test_wrong_language_is_absent() {
        let q = Questionnaire::from_json(&json!({
            "resourceType": "Questionnaire",
            "item": [{
                "linkId": "age",
                "type": "integer",
                "extension": [{
                    "url": INITIAL_EXPRESSION_URL,
                    "valueExpression": {"language": "text/cql", "expression": "AgeInYears()"}
                }]
            }]
        }))
        .unwrap();

        assert!(ExpressionIndex::build(&q).is_empty());
    }

    #[test]
    fn test_serializes_camel_case() {
        let index = ExpressionIndex::default();
        assert_eq!(
            serde_json::to_value(&index).unwrap(),
            json!({"initialExpressions": {}, "populationContexts": {}})
        );
    }
}
