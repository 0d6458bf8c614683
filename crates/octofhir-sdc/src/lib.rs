//! FHIR SDC questionnaire population for OctoFHIR
//!
//! Given a `Questionnaire` and a set of launch bindings (`%patient`,
//! `%user`, ...), this crate builds a pre-filled `QuestionnaireResponse`:
//! - initial expressions evaluated per item and coerced to the item's type
//! - repeating groups expanded from their population context
//! - coded answers validated against value set expansions after the build
//!
//! Expression evaluation and value set expansion are collaborators behind
//! the [`ExpressionEvaluator`] and [`ExpansionFetcher`] traits.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use octofhir_sdc::{Collaborators, NoTerminology, PathEvaluator, PopulationContext, Questionnaire};
//!
//! # async fn run(json: serde_json::Value, patient: serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
//! let questionnaire = Questionnaire::from_json(&json)?;
//! let seed: PopulationContext = [("patient", patient)].into_iter().collect();
//! let collaborators = Collaborators::new(Arc::new(PathEvaluator::new()), Arc::new(NoTerminology));
//!
//! if let Some(outcome) =
//!     octofhir_sdc::populate(&questionnaire, seed, &collaborators, Duration::from_secs(10)).await?
//! {
//!     println!("{}", serde_json::to_string_pretty(&outcome.response)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod answer;
pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod id;
pub mod index;
pub mod issue;
pub mod populate;
pub mod questionnaire;
mod repeat;
pub mod response;
pub mod terminology;
pub mod valueset;

pub use config::{LoggingConfig, SdcConfig, TerminologyConfig};
pub use context::PopulationContext;
pub use error::{EvaluationError, PopulateError, PopulateResult, TerminologyError};
#[cfg(feature = "fhirpath")]
pub use evaluator::FhirPathEvaluator;
pub use evaluator::{ExpressionEvaluator, PathEvaluator};
pub use expression::Expression;
pub use id::{IdGenerator, SequentialIdGenerator, UuidIdGenerator};
pub use index::ExpressionIndex;
pub use issue::{IssueKind, IssueSeverity, PopulationIssue};
pub use populate::{Collaborators, PopulateOutcome, Populator, populate};
pub use questionnaire::{ItemType, Questionnaire, QuestionnaireItem};
pub use response::{AnswerValue, Coding, QuestionnaireResponse, QuestionnaireResponseItem};
pub use terminology::{
    CachingExpansionFetcher, ContainedValueSetFetcher, ExpansionFetcher, ExpansionRequestConfig,
    HttpExpansionFetcher, NoTerminology, ValueSetConcept,
};
