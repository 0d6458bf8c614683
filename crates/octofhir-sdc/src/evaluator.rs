//! Expression evaluation contract.
//!
//! The engine never interprets expressions itself. It hands each
//! [`Expression`] and the current [`PopulationContext`] to an
//! [`ExpressionEvaluator`] and gets back a collection of JSON values.

mod path;

#[cfg(feature = "fhirpath")]
mod fhirpath;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::PopulationContext;
use crate::error::EvaluationError;
use crate::expression::Expression;

#[cfg(feature = "fhirpath")]
pub use fhirpath::FhirPathEvaluator;
pub use path::PathEvaluator;

/// Evaluates expressions against a population context.
///
/// Implementations may suspend (for example to expand value sets during a
/// `memberOf()` test). An empty collection means "no value".
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        expression: &Expression,
        context: &PopulationContext,
    ) -> Result<Vec<Value>, EvaluationError>;
}

#[async_trait]
impl<T: ExpressionEvaluator + ?Sized> ExpressionEvaluator for Arc<T> {
    async fn evaluate(
        &self,
        expression: &Expression,
        context: &PopulationContext,
    ) -> Result<Vec<Value>, EvaluationError> {
        (**self).evaluate(expression, context).await
    }
}
