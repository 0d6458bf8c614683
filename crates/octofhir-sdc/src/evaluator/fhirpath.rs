//! FHIRPath evaluator backed by `octofhir-fhirpath`.

use std::sync::Arc;

use async_trait::async_trait;
use octofhir_fhirpath::{Collection, EvaluationContext, FhirPathEngine, FhirPathValue, ModelProvider};
use serde_json::Value;

use super::ExpressionEvaluator;
use crate::context::PopulationContext;
use crate::error::EvaluationError;
use crate::expression::Expression;

/// Evaluates population expressions with a full FHIRPath engine.
///
/// Every context binding is exposed as a `%variable`. The `patient` binding,
/// when present, also becomes the evaluation focus.
pub struct FhirPathEvaluator {
    engine: Arc<FhirPathEngine>,
}

impl FhirPathEvaluator {
    pub fn new(engine: Arc<FhirPathEngine>) -> Self {
        Self { engine }
    }

    /// Engine with the standard function registry and no model provider.
    pub async fn with_default_engine() -> Result<Self, EvaluationError> {
        let registry = Arc::new(octofhir_fhirpath::create_function_registry());
        let model_provider = Arc::new(octofhir_fhir_model::EmptyModelProvider);
        let engine = FhirPathEngine::new(registry, model_provider)
            .await
            .map_err(|e| EvaluationError::Failed(format!("Failed to create FHIRPath engine: {e}")))?;
        Ok(Self::new(Arc::new(engine)))
    }
}

#[async_trait]
impl ExpressionEvaluator for FhirPathEvaluator {
    async fn evaluate(
        &self,
        expression: &Expression,
        context: &PopulationContext,
    ) -> Result<Vec<Value>, EvaluationError> {
        let provider = self.engine.get_model_provider();

        let focus = match context.get("patient") {
            Some(resource) => Collection::from_json_resource(resource.clone(), Some(provider.clone()))
                .await
                .map_err(|e| {
                    EvaluationError::Failed(format!("Failed to create FHIRPath context: {e}"))
                })?,
            None => Collection::empty(),
        };

        let eval_context = EvaluationContext::new(focus, provider.clone(), None, None, None);
        for (name, value) in context.iter() {
            eval_context.set_variable(name.to_string(), variable_value(value, &provider).await?);
        }

        let result = self
            .engine
            .evaluate(&expression.expression, &eval_context)
            .await
            .map_err(|e| EvaluationError::Failed(format!("FHIRPath evaluation failed: {e}")))?;

        Ok(result
            .value
            .into_vec()
            .iter()
            .map(|v| v.to_json_value())
            .collect())
    }
}

type Provider = Arc<dyn ModelProvider + Send + Sync>;

/// A binding as a FHIRPath variable: arrays bind element by element and
/// primitives keep their FHIRPath type.
async fn variable_value(value: &Value, provider: &Provider) -> Result<FhirPathValue, EvaluationError> {
    let mut values = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                values.extend(element_value(item, provider).await?);
            }
        }
        other => values.extend(element_value(other, provider).await?),
    }

    Ok(match values.len() {
        0 => FhirPathValue::Empty,
        1 => values.remove(0),
        _ => FhirPathValue::Collection(Collection::from(values)),
    })
}

async fn element_value(value: &Value, provider: &Provider) -> Result<Option<FhirPathValue>, EvaluationError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(FhirPathValue::boolean(*b))),
        Value::String(s) => Ok(Some(FhirPathValue::string(s.clone()))),
        Value::Number(n) if n.is_i64() => Ok(n.as_i64().map(FhirPathValue::integer)),
        _ => {
            let collection = Collection::from_json_resource(value.clone(), Some(provider.clone()))
                .await
                .map_err(|e| EvaluationError::Failed(format!("Failed to convert binding: {e}")))?;
            Ok(collection.into_vec().into_iter().next())
        }
    }
}
