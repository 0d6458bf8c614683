//! SDC expression metadata.
//!
//! Questionnaires attach expressions to items through extensions. They are
//! located once, while the Questionnaire is parsed, and carried as typed
//! [`Expression`] fields from then on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `sdc-questionnaire-initialExpression`
pub const INITIAL_EXPRESSION_URL: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-initialExpression";

/// `sdc-questionnaire-itemPopulationContext`
pub const ITEM_POPULATION_CONTEXT_URL: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-itemPopulationContext";

/// `sdc-questionnaire-launchContext`
pub const LAUNCH_CONTEXT_URL: &str =
    "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-launchContext";

/// Core `variable` extension
pub const VARIABLE_URL: &str = "http://hl7.org/fhir/StructureDefinition/variable";

/// The only expression language the engine hands to an evaluator.
pub const FHIRPATH_LANGUAGE: &str = "text/fhirpath";

/// A FHIR `Expression` restricted to what population needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    /// Name the result is bound under (`%name`), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub language: String,

    pub expression: String,
}

impl Expression {
    /// An unnamed FHIRPath expression.
    pub fn fhirpath(expression: impl Into<String>) -> Self {
        Self {
            name: None,
            language: FHIRPATH_LANGUAGE.to_string(),
            expression: expression.into(),
        }
    }

    /// A named FHIRPath expression.
    pub fn named(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::fhirpath(expression)
        }
    }

    /// Read the `valueExpression` of an extension.
    ///
    /// Anything other than a non-empty `text/fhirpath` expression yields `None`.
    pub fn from_extension(extension: &Value) -> Option<Self> {
        let value = extension.get("valueExpression")?;
        let language = value.get("language").and_then(|v| v.as_str())?;
        if language != FHIRPATH_LANGUAGE {
            return None;
        }
        let expression = value.get("expression").and_then(|v| v.as_str())?.trim();
        if expression.is_empty() {
            return None;
        }
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .filter(|n| !n.is_empty())
            .map(String::from);

        Some(Self {
            name,
            language: language.to_string(),
            expression: expression.to_string(),
        })
    }
}

/// All `%variable` tokens in an expression, in order of appearance.
///
/// Backtick-delimited names (`` %`vs-name` ``) are returned without the ticks.
pub fn referenced_variables(expression: &str) -> impl Iterator<Item = &str> {
    let mut rest = expression;
    std::iter::from_fn(move || {
        loop {
            let start = rest.find('%')?;
            let after = &rest[start + 1..];

            if let Some(quoted) = after.strip_prefix('`') {
                let end = quoted.find('`').unwrap_or(quoted.len());
                rest = quoted.get(end + 1..).unwrap_or("");
                if end > 0 {
                    return Some(&quoted[..end]);
                }
                continue;
            }

            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            rest = &after[end..];
            if end > 0 {
                return Some(&after[..end]);
            }
        }
    })
}

/// Extensions in `extensions` carrying the given URL.
pub(crate) fn extensions_with_url<'a>(
    extensions: &'a [Value],
    url: &'a str,
) -> impl Iterator<Item = &'a Value> {
    extensions
        .iter()
        .filter(move |ext| ext.get("url").and_then(|v| v.as_str()) == Some(url))
}

/// First usable expression among the extensions with the given URL.
pub(crate) fn first_expression(extensions: &[Value], url: &str) -> Option<Expression> {
    extensions_with_url(extensions, url).find_map(Expression::from_extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_extension_fhirpath() {
        let ext = json!({
            "url": INITIAL_EXPRESSION_URL,
            "valueExpression": {
                "language": "text/fhirpath",
                "expression": " %patient.gender "
            }
        });

        let expr = Expression::from_extension(&ext).unwrap();
        assert_eq!(expr.expression, "%patient.gender");
        assert_eq!(expr.name, None);
    }

    #[test]
    fn test_from_extension_rejects_other_languages() {
        let ext = json!({
            "url": INITIAL_EXPRESSION_URL,
            "valueExpression": {
                "language": "text/cql",
                "expression": "Patient.gender"
            }
        });
        assert!(Expression::from_extension(&ext).is_none());

        let empty = json!({
            "url": INITIAL_EXPRESSION_URL,
            "valueExpression": {"language": "text/fhirpath", "expression": ""}
        });
        assert!(Expression::from_extension(&empty).is_none());

        let wrong_type = json!({"url": INITIAL_EXPRESSION_URL, "valueString": "x"});
        assert!(Expression::from_extension(&wrong_type).is_none());
    }

    #[test]
    fn test_referenced_variables() {
        let vars: Vec<&str> =
            referenced_variables("%ConditionRepeat.code.coding.where(system = %`vs-x`) + %a_1")
                .collect();
        assert_eq!(vars, vec!["ConditionRepeat", "vs-x", "a_1"]);
    }

    #[test]
    fn test_modulo_is_not_a_variable() {
        assert_eq!(referenced_variables("10 % 3").count(), 0);
        assert_eq!(referenced_variables("%Cond.code").collect::<Vec<_>>(), vec!["Cond"]);
    }

    #[test]
    fn test_first_expression_skips_unusable() {
        let extensions = vec![
            json!({"url": "http://example.org/other", "valueString": "x"}),
            json!({
                "url": ITEM_POPULATION_CONTEXT_URL,
                "valueExpression": {"language": "application/x-fhir-query", "expression": "Condition?patient={{%patient.id}}"}
            }),
            json!({
                "url": ITEM_POPULATION_CONTEXT_URL,
                "valueExpression": {"name": "ConditionRepeat", "language": "text/fhirpath", "expression": "%Conditions.entry.resource"}
            }),
        ];

        let expr = first_expression(&extensions, ITEM_POPULATION_CONTEXT_URL).unwrap();
        assert_eq!(expr.name.as_deref(), Some("ConditionRepeat"));
    }
}
