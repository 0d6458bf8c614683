//! Population entry point

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, error, info, instrument, warn};

use crate::builder::BuildSession;
use crate::config::SdcConfig;
use crate::context::{PopulationContext, collection_value};
use crate::error::{PopulateError, PopulateResult};
use crate::evaluator::ExpressionEvaluator;
use crate::id::{IdGenerator, UuidIdGenerator};
use crate::index::ExpressionIndex;
use crate::issue::{IssueKind, PopulationIssue};
use crate::questionnaire::Questionnaire;
use crate::response::{QuestionnaireResponse, QuestionnaireResponseItem, Reference};
use crate::terminology::{ContainedValueSetFetcher, ExpansionFetcher, ExpansionRequestConfig};
use crate::valueset;

/// The external services population depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub terminology: Arc<dyn ExpansionFetcher>,
    pub expansion_config: ExpansionRequestConfig,
}

impl Collaborators {
    pub fn new(
        evaluator: Arc<dyn ExpressionEvaluator>,
        terminology: Arc<dyn ExpansionFetcher>,
    ) -> Self {
        Self {
            evaluator,
            terminology,
            expansion_config: ExpansionRequestConfig::default(),
        }
    }

    pub fn with_expansion_config(mut self, config: ExpansionRequestConfig) -> Self {
        self.expansion_config = config;
        self
    }
}

/// A populated response plus everything that went wrong along the way.
#[derive(Debug, Clone)]
pub struct PopulateOutcome {
    pub response: QuestionnaireResponse,
    pub issues: Vec<PopulationIssue>,
}

impl PopulateOutcome {
    pub fn has_warnings(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Issues as an `OperationOutcome`, or `None` when there are none.
    pub fn operation_outcome(&self) -> Option<Value> {
        if self.issues.is_empty() {
            return None;
        }
        Some(json!({
            "resourceType": "OperationOutcome",
            "issue": self.issues.iter().map(PopulationIssue::to_outcome_issue).collect::<Vec<_>>()
        }))
    }
}

/// Runs population with a time budget and request-scoped id generation.
pub struct Populator {
    timeout: Duration,
    id_generator: Arc<dyn IdGenerator>,
    authored: Option<OffsetDateTime>,
}

impl Populator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            id_generator: Arc::new(UuidIdGenerator),
            authored: None,
        }
    }

    pub fn from_config(config: &SdcConfig) -> Self {
        Self::new(config.timeout())
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Fix `authored` instead of using the current time.
    pub fn with_authored(mut self, authored: OffsetDateTime) -> Self {
        self.authored = Some(authored);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Populate `questionnaire` from `seed` bindings.
    ///
    /// Returns `Ok(None)` when the questionnaire has nothing to populate.
    /// The whole run is bounded by the timeout; on expiry nothing partial is
    /// returned.
    ///
    /// # Errors
    ///
    /// `PopulateError::Timeout` when the budget is exceeded and
    /// `PopulateError::Internal` when a collaborator panics.
    #[instrument(skip_all, fields(questionnaire = questionnaire.url.as_deref().unwrap_or("<anonymous>")))]
    pub async fn populate(
        &self,
        questionnaire: &Questionnaire,
        seed: PopulationContext,
        collaborators: &Collaborators,
    ) -> PopulateResult<Option<PopulateOutcome>> {
        info!(timeout_ms = self.timeout.as_millis() as u64, "Starting population");

        let run = AssertUnwindSafe(self.run(questionnaire, seed, collaborators)).catch_unwind();
        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                error!(panic = %panic_msg, "Population panicked");
                Err(PopulateError::internal(panic_msg))
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Population timed out");
                Err(PopulateError::Timeout(self.timeout))
            }
        }
    }

    async fn run(
        &self,
        questionnaire: &Questionnaire,
        seed: PopulationContext,
        collaborators: &Collaborators,
    ) -> PopulateResult<Option<PopulateOutcome>> {
        if questionnaire.items.is_empty() {
            debug!("Questionnaire has no items");
            return Ok(None);
        }

        let index = ExpressionIndex::build(questionnaire);
        if index.is_empty() && !questionnaire.has_static_initial_values() {
            debug!("Questionnaire has no initial values or population expressions");
            return Ok(None);
        }

        let mut issues = Vec::new();
        for launch in &questionnaire.launch_contexts {
            if !seed.contains(&launch.name) {
                warn!(launch_context = %launch.name, "Launch context not supplied");
                issues.push(PopulationIssue::warning(
                    IssueKind::LaunchContext,
                    None,
                    format!("Launch context %{} was not supplied", launch.name),
                ));
            }
        }

        let context = bind_variables(questionnaire, seed, collaborators, &mut issues).await;

        let mut session = BuildSession::new(collaborators.evaluator.as_ref(), &index);
        let mut items = session.build_items(&questionnaire.items, &context).await;
        let (pending, build_issues) = session.finish();
        issues.extend(build_issues);

        if !pending.is_empty() {
            let fetcher: Arc<dyn ExpansionFetcher> = if questionnaire.contained.is_empty() {
                collaborators.terminology.clone()
            } else {
                Arc::new(ContainedValueSetFetcher::new(
                    questionnaire.contained.clone(),
                    collaborators.terminology.clone(),
                ))
            };
            let resolved =
                valueset::resolve(&pending, fetcher.as_ref(), &collaborators.expansion_config).await;
            issues.extend(valueset::reconcile(&mut items, &pending, &resolved));
            valueset::prune(&mut items, &questionnaire.items);
        }

        let response = self.wrap_response(questionnaire, &context, items);
        info!(
            items = response.item.len(),
            issues = issues.len(),
            "Population finished"
        );
        Ok(Some(PopulateOutcome { response, issues }))
    }

    fn wrap_response(
        &self,
        questionnaire: &Questionnaire,
        context: &PopulationContext,
        items: Vec<QuestionnaireResponseItem>,
    ) -> QuestionnaireResponse {
        let authored = self.authored.unwrap_or_else(OffsetDateTime::now_utc);
        QuestionnaireResponse {
            id: Some(self.id_generator.next_id()),
            questionnaire: questionnaire.canonical(),
            subject: context.get("patient").and_then(resource_reference),
            author: context.get("user").and_then(resource_reference),
            authored: authored.format(&Rfc3339).ok(),
            item: items,
            ..QuestionnaireResponse::new()
        }
    }
}

/// Populate with default id generation.
///
/// # Errors
///
/// See [`Populator::populate`].
pub async fn populate(
    questionnaire: &Questionnaire,
    seed: PopulationContext,
    collaborators: &Collaborators,
    timeout: Duration,
) -> PopulateResult<Option<PopulateOutcome>> {
    Populator::new(timeout)
        .populate(questionnaire, seed, collaborators)
        .await
}

/// Evaluate questionnaire variables in order, each seeing the earlier ones.
async fn bind_variables(
    questionnaire: &Questionnaire,
    mut context: PopulationContext,
    collaborators: &Collaborators,
    issues: &mut Vec<PopulationIssue>,
) -> PopulationContext {
    for variable in &questionnaire.variables {
        let Some(name) = variable.name.as_deref() else {
            continue;
        };
        let value = match collaborators.evaluator.evaluate(variable, &context).await {
            Ok(values) => collection_value(values),
            Err(e) => {
                warn!(variable = name, error = %e, "Questionnaire variable failed");
                issues.push(PopulationIssue::warning(
                    IssueKind::Variable,
                    None,
                    format!("Variable %{name} failed: {e}"),
                ));
                Value::Array(Vec::new())
            }
        };
        context.insert(name, value);
    }
    context
}

/// `{"reference": "Type/id"}` for a resource with a type and id.
fn resource_reference(resource: &Value) -> Option<Reference> {
    let resource_type = resource.get("resourceType")?.as_str()?;
    let id = resource.get("id")?.as_str()?;
    Some(Reference {
        reference: Some(format!("{resource_type}/{id}")),
        r#type: Some(resource_type.to_string()),
        display: None,
    })
}
