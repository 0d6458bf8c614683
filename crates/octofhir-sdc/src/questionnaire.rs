//! Questionnaire parsing and types.
//!
//! The definition tree is read-only once parsed. SDC metadata that FHIR
//! carries in generic extensions (initial expressions, population contexts,
//! launch contexts, variables) is normalized into typed fields here, so the
//! population passes never scan extension lists.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PopulateError, PopulateResult};
use crate::expression::{
    Expression, INITIAL_EXPRESSION_URL, ITEM_POPULATION_CONTEXT_URL, LAUNCH_CONTEXT_URL,
    VARIABLE_URL, extensions_with_url, first_expression,
};
use crate::response::{AnswerValue, Coding};

/// A Questionnaire resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawQuestionnaire")]
pub struct Questionnaire {
    pub id: Option<String>,

    /// Canonical URL identifying this Questionnaire.
    pub url: Option<String>,

    pub version: Option<String>,

    pub title: Option<String>,

    pub status: Option<String>,

    /// Top-level items.
    pub items: Vec<QuestionnaireItem>,

    /// Launch contexts the form expects (`%patient`, `%user`, ...).
    pub launch_contexts: Vec<LaunchContext>,

    /// Questionnaire-level variables, in declaration order.
    pub variables: Vec<Expression>,

    /// Contained resources, kept raw (ValueSets are looked up by id).
    pub contained: Vec<Value>,
}

/// A single item of the definition tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawItem")]
pub struct QuestionnaireItem {
    pub link_id: String,

    pub text: Option<String>,

    pub item_type: ItemType,

    pub repeats: bool,

    /// Child items, in definition order.
    pub items: Vec<QuestionnaireItem>,

    pub answer_constraint: AnswerConstraint,

    /// Literal `initial[].value[x]` values.
    pub initial_values: Vec<AnswerValue>,

    pub initial_expression: Option<Expression>,

    pub population_context: Option<Expression>,

    pub code: Vec<Coding>,
}

/// `Questionnaire.item.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemType {
    Group,
    Display,
    Question,
    Boolean,
    Decimal,
    Integer,
    Date,
    DateTime,
    Time,
    String,
    Text,
    Url,
    Choice,
    #[serde(rename = "open-choice")]
    OpenChoice,
    Attachment,
    Reference,
    Quantity,
    Coding,
    #[serde(other)]
    Unknown,
}

impl ItemType {
    pub fn is_group(self) -> bool {
        self == Self::Group
    }

    pub fn is_display(self) -> bool {
        self == Self::Display
    }

    /// Items that can carry answers.
    pub fn is_question(self) -> bool {
        !matches!(self, Self::Group | Self::Display)
    }
}

/// How an item's permitted answers are constrained.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AnswerConstraint {
    #[default]
    None,
    /// Statically enumerated `answerOption`s.
    Options(Vec<AnswerOption>),
    /// `answerValueSet` reference, expanded on demand.
    ValueSet(String),
}

impl AnswerConstraint {
    pub fn options(&self) -> &[AnswerOption] {
        match self {
            Self::Options(options) => options,
            _ => &[],
        }
    }

    pub fn value_set(&self) -> Option<&str> {
        match self {
            Self::ValueSet(url) => Some(url),
            _ => None,
        }
    }
}

/// `Questionnaire.item.answerOption`
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOption {
    pub value: AnswerValue,
    pub initial_selected: bool,
}

/// A `sdc-questionnaire-launchContext` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchContext {
    /// Variable name, e.g. `patient`.
    pub name: String,
    /// Allowed resource types.
    pub types: Vec<String>,
    pub description: Option<String>,
}

impl Questionnaire {
    /// Parse a Questionnaire from a JSON Value.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not a Questionnaire.
    pub fn from_json(value: &Value) -> PopulateResult<Self> {
        check_resource_type(value)?;
        serde_json::from_value(value.clone())
            .map_err(|e| PopulateError::invalid_questionnaire(e.to_string()))
    }

    /// Parse a Questionnaire from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid JSON or not a Questionnaire.
    pub fn parse(s: &str) -> PopulateResult<Self> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| PopulateError::invalid_questionnaire(e.to_string()))?;
        Self::from_json(&value)
    }

    /// `url|version`, or just `url` when unversioned.
    pub fn canonical(&self) -> Option<String> {
        let url = self.url.as_ref()?;
        Some(match &self.version {
            Some(version) => format!("{url}|{version}"),
            None => url.clone(),
        })
    }

    /// First item with the given linkId, searching depth-first.
    pub fn find_item(&self, link_id: &str) -> Option<&QuestionnaireItem> {
        find_in(&self.items, link_id)
    }

    /// Whether any item carries literal initial values or pre-selected options.
    pub fn has_static_initial_values(&self) -> bool {
        fn any(items: &[QuestionnaireItem]) -> bool {
            items
                .iter()
                .any(|item| !item.static_initial_values().is_empty() || any(&item.items))
        }
        any(&self.items)
    }
}

impl QuestionnaireItem {
    /// Literal initial values, falling back to `initialSelected` options.
    pub fn static_initial_values(&self) -> Vec<AnswerValue> {
        if !self.initial_values.is_empty() {
            return self.initial_values.clone();
        }
        self.answer_constraint
            .options()
            .iter()
            .filter(|option| option.initial_selected)
            .map(|option| option.value.clone())
            .collect()
    }

    /// A repeating group expands into one response item per instance.
    pub fn is_repeating_group(&self) -> bool {
        self.repeats && self.item_type.is_group()
    }
}

fn find_in<'a>(items: &'a [QuestionnaireItem], link_id: &str) -> Option<&'a QuestionnaireItem> {
    items.iter().find_map(|item| {
        if item.link_id == link_id {
            Some(item)
        } else {
            find_in(&item.items, link_id)
        }
    })
}

fn check_resource_type(value: &Value) -> PopulateResult<()> {
    if !value.is_object() {
        return Err(PopulateError::invalid_questionnaire("expected a JSON object"));
    }
    match value.get("resourceType").and_then(|v| v.as_str()) {
        None | Some("Questionnaire") => Ok(()),
        Some(other) => Err(PopulateError::invalid_questionnaire(format!(
            "expected resourceType Questionnaire, got {other}"
        ))),
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestionnaire {
    id: Option<String>,
    url: Option<String>,
    version: Option<String>,
    title: Option<String>,
    status: Option<String>,
    #[serde(default)]
    item: Vec<QuestionnaireItem>,
    #[serde(default)]
    extension: Vec<Value>,
    #[serde(default)]
    contained: Vec<Value>,
}

impl From<RawQuestionnaire> for Questionnaire {
    fn from(raw: RawQuestionnaire) -> Self {
        let launch_contexts = extensions_with_url(&raw.extension, LAUNCH_CONTEXT_URL)
            .filter_map(parse_launch_context)
            .collect();

        // Variables must be named to be referenced
        let variables = extensions_with_url(&raw.extension, VARIABLE_URL)
            .filter_map(Expression::from_extension)
            .filter(|expr| expr.name.is_some())
            .collect();

        Self {
            id: raw.id,
            url: raw.url,
            version: raw.version,
            title: raw.title,
            status: raw.status,
            items: raw.item,
            launch_contexts,
            variables,
            contained: raw.contained,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    link_id: String,
    text: Option<String>,
    #[serde(rename = "type")]
    item_type: ItemType,
    #[serde(default)]
    repeats: bool,
    #[serde(default)]
    item: Vec<QuestionnaireItem>,
    #[serde(default)]
    answer_option: Vec<Value>,
    answer_value_set: Option<String>,
    #[serde(default)]
    initial: Vec<Value>,
    #[serde(default)]
    extension: Vec<Value>,
    #[serde(default)]
    code: Vec<Coding>,
}

impl From<RawItem> for QuestionnaireItem {
    fn from(raw: RawItem) -> Self {
        let options: Vec<AnswerOption> = raw
            .answer_option
            .iter()
            .filter_map(|option| {
                Some(AnswerOption {
                    value: AnswerValue::from_element(option)?,
                    initial_selected: option
                        .get("initialSelected")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                })
            })
            .collect();

        let answer_constraint = if !options.is_empty() {
            AnswerConstraint::Options(options)
        } else if let Some(url) = raw.answer_value_set.filter(|url| !url.is_empty()) {
            AnswerConstraint::ValueSet(url)
        } else {
            AnswerConstraint::None
        };

        // Only named contexts can be referenced from descendants
        let population_context = first_expression(&raw.extension, ITEM_POPULATION_CONTEXT_URL)
            .filter(|expr| expr.name.is_some());

        Self {
            link_id: raw.link_id,
            text: raw.text,
            item_type: raw.item_type,
            repeats: raw.repeats,
            items: raw.item,
            answer_constraint,
            initial_values: raw.initial.iter().filter_map(AnswerValue::from_element).collect(),
            initial_expression: first_expression(&raw.extension, INITIAL_EXPRESSION_URL),
            population_context,
            code: raw.code,
        }
    }
}

fn parse_launch_context(extension: &Value) -> Option<LaunchContext> {
    let parts = extension.get("extension").and_then(|v| v.as_array())?;
    let mut name = None;
    let mut types = Vec::new();
    let mut description = None;

    for part in parts {
        match part.get("url").and_then(|v| v.as_str()) {
            Some("name") => {
                name = part
                    .get("valueCoding")
                    .and_then(|c| c.get("code"))
                    .or_else(|| part.get("valueId"))
                    .or_else(|| part.get("valueString"))
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }
            Some("type") => {
                if let Some(t) = part.get("valueCode").and_then(|v| v.as_str()) {
                    types.push(t.to_string());
                }
            }
            Some("description") => {
                description = part.get("valueString").and_then(|v| v.as_str()).map(String::from);
            }
            _ => {}
        }
    }

    Some(LaunchContext {
        name: name?,
        types,
        description,
    })
}
