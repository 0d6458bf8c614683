//! Deferred value set resolution.
//!
//! While the tree is built, bare-string answers for items bound to an
//! `answerValueSet` are recorded as pending. After the build, every distinct
//! value set is expanded concurrently and the tree is reconciled: a pending
//! answer whose code is in the expansion becomes the full coding, anything
//! else is dropped.

use futures_util::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TerminologyError;
use crate::issue::PopulationIssue;
use crate::questionnaire::QuestionnaireItem;
use crate::response::{AnswerValue, QuestionnaireResponseAnswer, QuestionnaireResponseItem};
use crate::terminology::{ExpansionFetcher, ExpansionRequestConfig, ValueSetConcept};

/// Codes awaiting validation against one item's value set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingValueSetRequest {
    pub owner_link_id: String,
    pub value_set: String,
    pub candidates: Vec<String>,
}

/// Pending requests of one population run, keyed by linkId.
///
/// Repeat instances share a linkId, so their candidates are merged.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    requests: IndexMap<String, PendingValueSetRequest>,
}

impl PendingRequests {
    pub fn add(&mut self, link_id: &str, value_set: &str, candidate: String) {
        let request = self
            .requests
            .entry(link_id.to_string())
            .or_insert_with(|| PendingValueSetRequest {
                owner_link_id: link_id.to_string(),
                value_set: value_set.to_string(),
                candidates: Vec::new(),
            });
        if !request.candidates.contains(&candidate) {
            request.candidates.push(candidate);
        }
    }

    pub fn get(&self, link_id: &str) -> Option<&PendingValueSetRequest> {
        self.requests.get(link_id)
    }

    /// Distinct value set references, in first-seen order.
    pub fn value_sets(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        for request in self.requests.values() {
            if !refs.contains(&request.value_set.as_str()) {
                refs.push(&request.value_set);
            }
        }
        refs
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Settled expansion results keyed by value set reference.
pub type ResolvedMap = IndexMap<String, Result<Vec<ValueSetConcept>, TerminologyError>>;

/// Expand every referenced value set concurrently.
///
/// One failing expansion never cancels the others.
pub async fn resolve(
    pending: &PendingRequests,
    fetcher: &dyn ExpansionFetcher,
    config: &ExpansionRequestConfig,
) -> ResolvedMap {
    let refs = pending.value_sets();
    if refs.is_empty() {
        return ResolvedMap::new();
    }
    debug!(value_sets = refs.len(), "Resolving pending value sets");

    let results = join_all(refs.iter().map(|r| fetcher.fetch_expansion(r, config))).await;

    refs.into_iter()
        .zip(results)
        .map(|(value_set, result)| {
            if let Err(e) = &result {
                warn!(value_set, error = %e, "Value set expansion failed");
            }
            (value_set.to_string(), result)
        })
        .collect()
}

/// Replace or drop every pending answer in `items`.
pub fn reconcile(
    items: &mut [QuestionnaireResponseItem],
    pending: &PendingRequests,
    resolved: &ResolvedMap,
) -> Vec<PopulationIssue> {
    let mut issues = Vec::new();
    for item in items {
        reconcile_item(item, pending, resolved, &mut issues);
    }
    issues
}

fn reconcile_item(
    item: &mut QuestionnaireResponseItem,
    pending: &PendingRequests,
    resolved: &ResolvedMap,
    issues: &mut Vec<PopulationIssue>,
) {
    if let Some(request) = pending.get(&item.link_id)
        && let Some(answers) = item.answer.take()
    {
        let expansion = resolved.get(&request.value_set);
        let mut kept: Vec<QuestionnaireResponseAnswer> = Vec::new();
        let mut orphans = Vec::new();

        for mut answer in answers {
            let code = match &answer.value {
                AnswerValue::String(s) if request.candidates.contains(s) => s.clone(),
                _ => {
                    kept.push(answer);
                    continue;
                }
            };

            match lookup(expansion, &code) {
                Ok(concept) => {
                    answer.value = AnswerValue::Coding(concept.to_coding());
                    kept.push(answer);
                }
                Err(message) => {
                    debug!(link_id = %item.link_id, code = %code, "Dropping unresolved answer");
                    issues.push(PopulationIssue::value_set(&item.link_id, message));
                    orphans.extend(answer.item.take().unwrap_or_default());
                }
            }
        }

        item.answer = (!kept.is_empty()).then_some(kept);

        // Children nested under a dropped answer stay in the tree
        if !orphans.is_empty() {
            match item.answer.as_mut().and_then(|answers| answers.first_mut()) {
                Some(first) => first.item.get_or_insert_with(Vec::new).extend(orphans),
                None => item.item.get_or_insert_with(Vec::new).extend(orphans),
            }
        }
    }

    if let Some(children) = item.item.as_mut() {
        for child in children {
            reconcile_item(child, pending, resolved, issues);
        }
    }
    if let Some(answers) = item.answer.as_mut() {
        for answer in answers {
            if let Some(children) = answer.item.as_mut() {
                for child in children {
                    reconcile_item(child, pending, resolved, issues);
                }
            }
        }
    }
}

/// Bring the tree back to the shape the builder gives unpopulated items.
///
/// Root items left without any answer are removed. Nested items left
/// without any answer become `linkId`/`text` placeholders. Repeat instances
/// are kept so the instance count still follows the driving context.
pub fn prune(items: &mut Vec<QuestionnaireResponseItem>, definitions: &[QuestionnaireItem]) {
    items.retain_mut(|item| {
        let definition = definition_of(definitions, &item.link_id);
        prune_item(item, definition) || definition.is_some_and(QuestionnaireItem::is_repeating_group)
    });
}

/// Prune below `item`; returns whether anything under it still has an answer.
fn prune_item(item: &mut QuestionnaireResponseItem, definition: Option<&QuestionnaireItem>) -> bool {
    let child_definitions = definition.map(|d| d.items.as_slice()).unwrap_or_default();
    let mut populated = item.has_answer();

    if let Some(children) = item.item.as_mut() {
        populated |= prune_children(children, child_definitions);
    }
    if let Some(answers) = item.answer.as_mut() {
        for answer in answers {
            if let Some(children) = answer.item.as_mut() {
                populated |= prune_children(children, child_definitions);
            }
        }
    }
    populated
}

fn prune_children(children: &mut [QuestionnaireResponseItem], definitions: &[QuestionnaireItem]) -> bool {
    let mut populated = false;
    for child in children {
        let definition = definition_of(definitions, &child.link_id);
        if prune_item(child, definition) {
            populated = true;
        } else if !definition.is_some_and(QuestionnaireItem::is_repeating_group) {
            child.item = None;
        }
    }
    populated
}

fn definition_of<'a>(definitions: &'a [QuestionnaireItem], link_id: &str) -> Option<&'a QuestionnaireItem> {
    definitions.iter().find(|definition| definition.link_id == link_id)
}

fn lookup<'a>(
    expansion: Option<&'a Result<Vec<ValueSetConcept>, TerminologyError>>,
    code: &str,
) -> Result<&'a ValueSetConcept, String> {
    match expansion {
        Some(Ok(concepts)) => concepts
            .iter()
            .find(|concept| concept.code == code)
            .ok_or_else(|| format!("Code '{code}' is not in the value set expansion")),
        Some(Err(e)) => Err(format!("Could not validate code '{code}': {e}")),
        None => Err(format!("Could not validate code '{code}': value set was not resolved")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedFetcher;

    #[async_trait]
    impl ExpansionFetcher for FixedFetcher {
        async fn fetch_expansion(
            &self,
            value_set: &str,
            _config: &ExpansionRequestConfig,
        ) -> Result<Vec<ValueSetConcept>, TerminologyError> {
            match value_set {
                "http://vs/gender" => Ok(vec![ValueSetConcept {
                    system: Some("http://hl7.org/fhir/administrative-gender".into()),
                    version: None,
                    code: "female".into(),
                    display: Some("Female".into()),
                }]),
                other => Err(TerminologyError::ValueSetNotFound(other.to_string())),
            }
        }
    }

    fn answered(link_id: &str, value: &str) -> QuestionnaireResponseItem {
        QuestionnaireResponseItem {
            link_id: link_id.into(),
            text: None,
            answer: Some(vec![AnswerValue::String(value.into()).into()]),
            item: None,
        }
    }

    #[test]
    fn test_pending_requests_merge_and_dedupe() {
        let mut pending = PendingRequests::default();
        pending.add("gender", "http://vs/gender", "female".into());
        pending.add("gender", "http://vs/gender", "female".into());
        pending.add("gender", "http://vs/gender", "male".into());
        pending.add("sex", "http://vs/gender", "male".into());

        assert_eq!(pending.len(), 2);
        assert_eq!(pending.get("gender").unwrap().candidates, vec!["female", "male"]);
        assert_eq!(pending.value_sets(), vec!["http://vs/gender"]);
    }

    #[tokio::test]
    async fn test_resolve_settles_every_request() {
        let mut pending = PendingRequests::default();
        pending.add("gender", "http://vs/gender", "female".into());
        pending.add("color", "http://vs/missing", "red".into());

        let resolved = resolve(&pending, &FixedFetcher, &ExpansionRequestConfig::default()).await;
        assert_eq!(resolved.len(), 2);
        assert!(resolved["http://vs/gender"].is_ok());
        assert!(resolved["http://vs/missing"].is_err());
    }

    #[tokio::test]
    async fn test_reconcile_replaces_and_drops() {
        let mut pending = PendingRequests::default();
        pending.add("gender", "http://vs/gender", "female".into());
        pending.add("other-gender", "http://vs/gender", "unknown-code".into());
        pending.add("color", "http://vs/missing", "red".into());

        let resolved = resolve(&pending, &FixedFetcher, &ExpansionRequestConfig::default()).await;

        let mut items = vec![
            answered("gender", "female"),
            answered("other-gender", "unknown-code"),
            answered("color", "red"),
            answered("name", "Jane"),
        ];
        let issues = reconcile(&mut items, &pending, &resolved);

        let coding = items[0].answers()[0].value.as_coding().unwrap();
        assert_eq!(coding.display.as_deref(), Some("Female"));
        assert_eq!(
            coding.system.as_deref(),
            Some("http://hl7.org/fhir/administrative-gender")
        );

        assert!(items[1].answer.is_none());
        assert!(items[2].answer.is_none());
        assert_eq!(items[3].answers()[0].value, AnswerValue::String("Jane".into()));
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_reconcile_keeps_children_of_dropped_answer() {
        let mut pending = PendingRequests::default();
        pending.add("q", "http://vs/x", "nope".into());
        let mut resolved = ResolvedMap::new();
        resolved.insert("http://vs/x".into(), Ok(Vec::new()));

        let mut items = vec![QuestionnaireResponseItem {
            link_id: "q".into(),
            text: None,
            answer: Some(vec![QuestionnaireResponseAnswer {
                value: AnswerValue::String("nope".into()),
                item: Some(vec![answered("child", "kept")]),
            }]),
            item: None,
        }];

        reconcile(&mut items, &pending, &resolved);
        assert!(items[0].answer.is_none());
        assert_eq!(items[0].items()[0].link_id, "child");
    }

    #[test]
    fn test_prune_restores_unpopulated_shape() {
        let definitions = crate::questionnaire::Questionnaire::from_json(&serde_json::json!({
            "resourceType": "Questionnaire",
            "item": [
                {"linkId": "gender", "type": "choice"},
                {"linkId": "family", "type": "string"},
                {
                    "linkId": "details",
                    "type": "group",
                    "item": [
                        {"linkId": "coded", "type": "group", "item": [{"linkId": "code", "type": "choice"}]},
                        {"linkId": "note", "type": "string"}
                    ]
                },
                {"linkId": "visits", "type": "group", "repeats": true, "item": [{"linkId": "kind", "type": "choice"}]}
            ]
        }))
        .unwrap()
        .items;

        let shell = |link_id: &str, children: Option<Vec<QuestionnaireResponseItem>>| QuestionnaireResponseItem {
            link_id: link_id.into(),
            text: None,
            answer: None,
            item: children,
        };
        let mut items = vec![
            shell("gender", None),
            answered("family", "Doe"),
            shell(
                "details",
                Some(vec![shell("coded", Some(vec![shell("code", None)])), answered("note", "x")]),
            ),
            shell("visits", Some(vec![shell("kind", None)])),
        ];

        prune(&mut items, &definitions);

        let ids: Vec<&str> = items.iter().map(|item| item.link_id.as_str()).collect();
        assert_eq!(ids, vec!["family", "details", "visits"]);
        // Emptied nested group collapses to a placeholder
        assert!(items[1].items()[0].item.is_none());
        assert_eq!(items[1].items()[1].link_id, "note");
        // Repeat instance survives with its placeholder children
        assert_eq!(items[2].items().len(), 1);
    }
}
