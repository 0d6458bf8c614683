//! Response tree construction.
//!
//! [`BuildSession`] walks the definition tree depth-first, evaluating initial
//! expressions against the current [`PopulationContext`] and coercing the
//! results into answers. Repeating groups are handed to the repeat module.
//! Everything one population run accumulates (pending value set codes and
//! issues) lives on the session, which is never shared between runs.

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::answer::{Coerced, coerce_all};
use crate::context::{PopulationContext, collection_value};
use crate::evaluator::ExpressionEvaluator;
use crate::expression::Expression;
use crate::index::ExpressionIndex;
use crate::issue::PopulationIssue;
use crate::questionnaire::QuestionnaireItem;
use crate::repeat;
use crate::response::{QuestionnaireResponseAnswer, QuestionnaireResponseItem};
use crate::valueset::PendingRequests;

/// Outcome of building one definition item.
#[derive(Debug, Clone, PartialEq)]
pub enum Built {
    Node(QuestionnaireResponseItem),
    /// Repeating group instances, possibly none.
    Instances(Vec<QuestionnaireResponseItem>),
    Unpopulated,
}

impl Built {
    pub fn is_populated(&self) -> bool {
        match self {
            Self::Node(_) => true,
            Self::Instances(instances) => !instances.is_empty(),
            Self::Unpopulated => false,
        }
    }
}

/// Request-scoped state of one tree build.
pub struct BuildSession<'a> {
    pub(crate) evaluator: &'a dyn ExpressionEvaluator,
    pub(crate) index: &'a ExpressionIndex,
    pending: PendingRequests,
    issues: Vec<PopulationIssue>,
    /// Names bound to a single element by the enclosing repeat instances
    element_bound: Vec<String>,
}

impl<'a> BuildSession<'a> {
    pub fn new(evaluator: &'a dyn ExpressionEvaluator, index: &'a ExpressionIndex) -> Self {
        Self {
            evaluator,
            index,
            pending: PendingRequests::default(),
            issues: Vec::new(),
            element_bound: Vec::new(),
        }
    }

    /// Build the top-level items. Unpopulated items are omitted.
    pub async fn build_items(
        &mut self,
        items: &[QuestionnaireItem],
        context: &PopulationContext,
    ) -> Vec<QuestionnaireResponseItem> {
        let mut out = Vec::new();
        for item in items {
            match self.build_item(item, context).await {
                Built::Node(node) => out.push(node),
                Built::Instances(instances) => out.extend(instances),
                Built::Unpopulated => {}
            }
        }
        out
    }

    /// Build one item and its subtree.
    pub fn build_item<'s>(
        &'s mut self,
        item: &'s QuestionnaireItem,
        context: &'s PopulationContext,
    ) -> BoxFuture<'s, Built> {
        Box::pin(async move {
            if item.item_type.is_display() {
                return Built::Unpopulated;
            }
            if item.is_repeating_group() {
                return Built::Instances(repeat::instantiate(self, item, context).await);
            }
            if item.items.is_empty() {
                return self.build_leaf(item, context).await;
            }
            self.build_group(item, context).await
        })
    }

    /// Give up the accumulated pending requests and issues.
    pub fn finish(self) -> (PendingRequests, Vec<PopulationIssue>) {
        (self.pending, self.issues)
    }

    pub(crate) fn push_issue(&mut self, issue: PopulationIssue) {
        self.issues.push(issue);
    }

    /// Whether an enclosing repeat instance bound `name` to one element.
    pub(crate) fn is_element_bound(&self, name: &str) -> bool {
        self.element_bound.iter().any(|bound| bound == name)
    }

    /// Build the children of one repeat instance whose `names` are bound
    /// element by element.
    pub(crate) async fn build_instance_children(
        &mut self,
        group: &QuestionnaireItem,
        names: &[&str],
        context: &PopulationContext,
    ) -> Vec<QuestionnaireResponseItem> {
        let mark = self.element_bound.len();
        self.element_bound.extend(names.iter().map(|name| name.to_string()));
        let (children, _) = self.build_children(group, context).await;
        self.element_bound.truncate(mark);
        children
    }

    async fn build_leaf(&mut self, item: &QuestionnaireItem, context: &PopulationContext) -> Built {
        let answers = self.populate_answers(item, context).await;
        if answers.is_empty() {
            Built::Unpopulated
        } else {
            Built::Node(QuestionnaireResponseItem::with_answers(item, answers))
        }
    }

    async fn build_group(&mut self, item: &QuestionnaireItem, context: &PopulationContext) -> Built {
        let scoped;
        let context = match &item.population_context {
            Some(expression) => {
                scoped = self.bind_own_context(item, expression, context).await;
                &scoped
            }
            None => context,
        };

        let answers = self.populate_answers(item, context).await;
        let (children, populated) = self.build_children(item, context).await;
        if !populated && answers.is_empty() {
            return Built::Unpopulated;
        }

        let answers = (!answers.is_empty()).then_some(answers);
        Built::Node(QuestionnaireResponseItem::with_children(item, children, answers))
    }

    /// Build the children of `item`, with placeholders for unpopulated ones.
    ///
    /// Returns the children and whether any of them was populated.
    pub(crate) async fn build_children(
        &mut self,
        item: &QuestionnaireItem,
        context: &PopulationContext,
    ) -> (Vec<QuestionnaireResponseItem>, bool) {
        let mut children = Vec::new();
        let mut populated = false;

        for child in &item.items {
            let built = self.build_item(child, context).await;
            populated |= built.is_populated();
            match built {
                Built::Node(node) => children.push(node),
                Built::Instances(instances) => children.extend(instances),
                Built::Unpopulated => {
                    if !child.item_type.is_display() && !child.is_repeating_group() {
                        children.push(QuestionnaireResponseItem::placeholder(child));
                    }
                }
            }
        }

        (children, populated)
    }

    /// Answers for a question item: initial expression, then static values.
    async fn populate_answers(
        &mut self,
        item: &QuestionnaireItem,
        context: &PopulationContext,
    ) -> Vec<QuestionnaireResponseAnswer> {
        if !item.item_type.is_question() {
            return Vec::new();
        }

        let index = self.index;
        if let Some(expression) = index.initial_expression(&item.link_id) {
            match self.evaluator.evaluate(expression, context).await {
                Ok(values) => {
                    let coerced = coerce_all(item, &values);
                    if !coerced.is_empty() {
                        return self.record(item, coerced);
                    }
                    debug!(link_id = %item.link_id, "Initial expression produced no value");
                }
                Err(e) => {
                    warn!(link_id = %item.link_id, error = %e, "Initial expression failed");
                    self.issues
                        .push(PopulationIssue::expression(&item.link_id, e.to_string()));
                }
            }
        }

        item.static_initial_values()
            .into_iter()
            .map(QuestionnaireResponseAnswer::new)
            .collect()
    }

    fn record(
        &mut self,
        item: &QuestionnaireItem,
        coerced: Vec<Coerced>,
    ) -> Vec<QuestionnaireResponseAnswer> {
        coerced
            .into_iter()
            .map(|answer| {
                if let (Coerced::Pending(code), Some(value_set)) =
                    (&answer, item.answer_constraint.value_set())
                {
                    self.pending.add(&item.link_id, value_set, code.clone());
                }
                QuestionnaireResponseAnswer::new(answer.into_provisional())
            })
            .collect()
    }

    /// Evaluate a population context declared on `owner`.
    ///
    /// Failures are recorded and yield `None`.
    pub(crate) async fn evaluate_context(
        &mut self,
        owner: &QuestionnaireItem,
        expression: &Expression,
        context: &PopulationContext,
    ) -> Option<Vec<Value>> {
        match self.evaluator.evaluate(expression, context).await {
            Ok(values) => Some(values),
            Err(e) => {
                warn!(
                    link_id = %owner.link_id,
                    context = expression.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "Population context failed"
                );
                self.issues.push(PopulationIssue::expression(
                    &owner.link_id,
                    format!("Population context failed: {e}"),
                ));
                None
            }
        }
    }

    /// Bind a non-repeating group's own population context for its subtree.
    async fn bind_own_context(
        &mut self,
        item: &QuestionnaireItem,
        expression: &Expression,
        context: &PopulationContext,
    ) -> PopulationContext {
        let Some(name) = expression.name.as_deref() else {
            return context.clone();
        };
        let values = self
            .evaluate_context(item, expression, context)
            .await
            .unwrap_or_default();
        debug!(link_id = %item.link_id, context = name, size = values.len(), "Bound population context");
        context.with(name, collection_value(values))
    }
}
