//! Repeating group instantiation.
//!
//! A repeating group produces one response instance per element of its
//! driving population context. The driver is the group's own
//! `itemPopulationContext` when it has one, otherwise the first population
//! context its descendants' initial expressions refer to. Any other contexts
//! the descendants refer to are bound index by index alongside the driver.

use serde_json::Value;
use tracing::{debug, warn};

use crate::builder::BuildSession;
use crate::context::{PopulationContext, into_collection};
use crate::expression::{Expression, referenced_variables};
use crate::index::ExpressionIndex;
use crate::issue::{IssueKind, PopulationIssue};
use crate::questionnaire::QuestionnaireItem;
use crate::response::QuestionnaireResponseItem;

/// Where the collection of a driving context comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Source<'a> {
    /// Evaluate the context's expression under the current context.
    Expression(&'a Expression),
    /// Already bound in the current context by an ancestor.
    Bound,
}

/// Expand `group` into its instances under `context`.
///
/// Returns no instances when no driver is found or it resolves to nothing.
pub(crate) async fn instantiate(
    session: &mut BuildSession<'_>,
    group: &QuestionnaireItem,
    context: &PopulationContext,
) -> Vec<QuestionnaireResponseItem> {
    let contexts = driving_contexts(group, session, context);

    let Some((driver_name, driver_source)) = contexts.first().copied() else {
        debug!(link_id = %group.link_id, "Repeating group has no population context");
        return Vec::new();
    };

    let Some(collection) = resolve(session, group, driver_name, driver_source, context).await else {
        return Vec::new();
    };
    let count = collection.len();
    debug!(link_id = %group.link_id, context = driver_name, count, "Instantiating repeating group");
    if count == 0 {
        return Vec::new();
    }

    let mut parallel: Vec<(&str, Vec<Value>)> = Vec::new();
    for &(name, source) in &contexts[1..] {
        let values = resolve(session, group, name, source, context)
            .await
            .unwrap_or_default();
        if values.len() != count {
            warn!(
                link_id = %group.link_id,
                driver = driver_name,
                driver_len = count,
                context = name,
                context_len = values.len(),
                "Population contexts of a repeating group differ in length"
            );
            session.push_issue(PopulationIssue::warning(
                IssueKind::RepeatCardinality,
                Some(&group.link_id),
                format!(
                    "%{driver_name} has {count} elements but %{name} has {}; %{driver_name} decides the instance count",
                    values.len()
                ),
            ));
        }
        parallel.push((name, values));
    }

    let names: Vec<&str> = contexts.iter().map(|(name, _)| *name).collect();
    let mut instances = Vec::with_capacity(count);
    for (i, element) in collection.into_iter().enumerate() {
        let mut instance_context = context.with(driver_name, element);
        for (name, values) in &parallel {
            let value = values.get(i).cloned().unwrap_or(Value::Array(Vec::new()));
            instance_context = instance_context.with(*name, value);
        }

        let children = session
            .build_instance_children(group, &names, &instance_context)
            .await;
        instances.push(QuestionnaireResponseItem::with_children(group, children, None));
    }
    instances
}

async fn resolve(
    session: &mut BuildSession<'_>,
    group: &QuestionnaireItem,
    name: &str,
    source: Source<'_>,
    context: &PopulationContext,
) -> Option<Vec<Value>> {
    match source {
        Source::Expression(expression) => session.evaluate_context(group, expression, context).await,
        Source::Bound => Some(into_collection(context.get(name).cloned().unwrap_or(Value::Null))),
    }
}

/// Population contexts that drive `group`, driver first.
///
/// Descendants are scanned in pre-order. Nested repeating groups are not
/// entered and contexts declared inside the group are bound by their owners.
/// A context an ancestor group bound as a whole collection drives from that
/// binding. Names an enclosing repeat instance bound to one element only
/// drive when nothing else does.
fn driving_contexts<'a>(
    group: &'a QuestionnaireItem,
    session: &BuildSession<'a>,
    context: &PopulationContext,
) -> Vec<(&'a str, Source<'a>)> {
    let index = session.index;
    let mut found: Vec<(&'a str, Source<'a>)> = Vec::new();

    if let Some(expression) = &group.population_context
        && let Some(name) = expression.name.as_deref()
    {
        found.push((name, Source::Expression(expression)));
    }

    let mut declared_inside = Vec::new();
    let mut referenced = Vec::new();
    for child in &group.items {
        scan(child, index, &mut declared_inside, &mut referenced);
    }

    let mut element_bound = None;
    for name in referenced {
        if declared_inside.contains(&name) || found.iter().any(|(existing, _)| *existing == name) {
            continue;
        }
        if session.is_element_bound(name) {
            element_bound.get_or_insert(name);
        } else if context.contains(name) {
            found.push((name, Source::Bound));
        } else if let Some(entry) = index.population_context(name) {
            found.push((name, Source::Expression(&entry.expression)));
        }
    }

    if found.is_empty()
        && let Some(name) = element_bound
    {
        found.push((name, Source::Bound));
    }
    found
}

fn scan<'a>(
    item: &'a QuestionnaireItem,
    index: &'a ExpressionIndex,
    declared_inside: &mut Vec<&'a str>,
    referenced: &mut Vec<&'a str>,
) {
    if item.is_repeating_group() {
        return;
    }
    if let Some(name) = item
        .population_context
        .as_ref()
        .and_then(|expression| expression.name.as_deref())
    {
        declared_inside.push(name);
    }
    if let Some(expression) = index.initial_expression(&item.link_id) {
        for var in referenced_variables(&expression.expression) {
            if index.population_context(var).is_some() && !referenced.contains(&var) {
                referenced.push(var);
            }
        }
    }
    for child in &item.items {
        scan(child, index, declared_inside, referenced);
    }
}
