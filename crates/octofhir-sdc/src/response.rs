//! QuestionnaireResponse types.
//!
//! These mirror the FHIR JSON shape closely so a populated response can be
//! serialized straight back to the client. Answers use the `value[x]`
//! convention (`{"valueCoding": {...}}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::questionnaire::QuestionnaireItem;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<String>,
}

/// A typed answer value, serialized as FHIR `value[x]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnswerValue {
    #[serde(rename = "valueBoolean")]
    Boolean(bool),
    #[serde(rename = "valueDecimal")]
    Decimal(f64),
    #[serde(rename = "valueInteger")]
    Integer(i64),
    #[serde(rename = "valueDate")]
    Date(String),
    #[serde(rename = "valueDateTime")]
    DateTime(String),
    #[serde(rename = "valueTime")]
    Time(String),
    #[serde(rename = "valueString")]
    String(String),
    #[serde(rename = "valueUri")]
    Uri(String),
    #[serde(rename = "valueAttachment")]
    Attachment(Attachment),
    #[serde(rename = "valueCoding")]
    Coding(Coding),
    #[serde(rename = "valueQuantity")]
    Quantity(Quantity),
    #[serde(rename = "valueReference")]
    Reference(Reference),
}

impl AnswerValue {
    /// Read the first `value[x]` property of a FHIR element such as
    /// `Questionnaire.item.initial` or `Questionnaire.item.answerOption`.
    ///
    /// Unknown or malformed `value[x]` types yield `None`.
    pub fn from_element(element: &Value) -> Option<Self> {
        let object = element.as_object()?;
        object
            .iter()
            .filter(|(key, _)| key.starts_with("value"))
            .find_map(|(key, value)| {
                let mut single = serde_json::Map::new();
                single.insert(key.clone(), value.clone());
                serde_json::from_value(Value::Object(single)).ok()
            })
    }

    /// FHIR type name of the carried value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Decimal(_) => "decimal",
            Self::Integer(_) => "integer",
            Self::Date(_) => "date",
            Self::DateTime(_) => "dateTime",
            Self::Time(_) => "time",
            Self::String(_) => "string",
            Self::Uri(_) => "uri",
            Self::Attachment(_) => "Attachment",
            Self::Coding(_) => "Coding",
            Self::Quantity(_) => "Quantity",
            Self::Reference(_) => "Reference",
        }
    }

    pub fn as_coding(&self) -> Option<&Coding> {
        match self {
            Self::Coding(coding) => Some(coding),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// `QuestionnaireResponse.item.answer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionnaireResponseAnswer {
    #[serde(flatten)]
    pub value: AnswerValue,

    /// Items nested under this answer (question items with children).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<QuestionnaireResponseItem>>,
}

impl QuestionnaireResponseAnswer {
    pub fn new(value: AnswerValue) -> Self {
        Self { value, item: None }
    }
}

impl From<AnswerValue> for QuestionnaireResponseAnswer {
    fn from(value: AnswerValue) -> Self {
        Self::new(value)
    }
}

/// `QuestionnaireResponse.item`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponseItem {
    pub link_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Absent (not empty) when nothing was populated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Vec<QuestionnaireResponseAnswer>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<QuestionnaireResponseItem>>,
}

impl QuestionnaireResponseItem {
    /// An item with the definition's linkId and text and nothing else.
    pub fn placeholder(definition: &QuestionnaireItem) -> Self {
        Self {
            link_id: definition.link_id.clone(),
            text: definition.text.clone(),
            answer: None,
            item: None,
        }
    }

    pub fn with_answers(definition: &QuestionnaireItem, answers: Vec<QuestionnaireResponseAnswer>) -> Self {
        Self {
            answer: (!answers.is_empty()).then_some(answers),
            ..Self::placeholder(definition)
        }
    }

    /// An item with children and, for question items, its own answers.
    ///
    /// Children of an answered item are nested under its first answer, since
    /// a response item cannot carry both `answer` and `item`.
    pub fn with_children(
        definition: &QuestionnaireItem,
        children: Vec<QuestionnaireResponseItem>,
        answers: Option<Vec<QuestionnaireResponseAnswer>>,
    ) -> Self {
        let mut node = Self::placeholder(definition);
        match answers.filter(|a| !a.is_empty()) {
            Some(mut answers) => {
                if !children.is_empty() {
                    answers[0].item = Some(children);
                }
                node.answer = Some(answers);
            }
            None => {
                node.item = (!children.is_empty()).then_some(children);
            }
        }
        node
    }

    pub fn answers(&self) -> &[QuestionnaireResponseAnswer] {
        self.answer.as_deref().unwrap_or_default()
    }

    pub fn items(&self) -> &[QuestionnaireResponseItem] {
        self.item.as_deref().unwrap_or_default()
    }

    pub fn has_answer(&self) -> bool {
        !self.answers().is_empty()
    }

    /// Direct children, including the ones nested under answers.
    pub fn children(&self) -> impl Iterator<Item = &QuestionnaireResponseItem> {
        self.items().iter().chain(
            self.answers()
                .iter()
                .flat_map(|answer| answer.item.as_deref().unwrap_or_default()),
        )
    }
}

/// The populated `QuestionnaireResponse` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questionnaire: Option<String>,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireResponseItem>,
}

impl QuestionnaireResponse {
    /// An empty `in-progress` response.
    pub fn new() -> Self {
        Self {
            resource_type: "QuestionnaireResponse".to_string(),
            id: None,
            questionnaire: None,
            status: "in-progress".to_string(),
            subject: None,
            authored: None,
            author: None,
            item: Vec::new(),
        }
    }

    /// All items with the given linkId, in document order.
    ///
    /// Repeated groups yield one entry per instance.
    pub fn find_items(&self, link_id: &str) -> Vec<&QuestionnaireResponseItem> {
        let mut found = Vec::new();
        collect_items(&self.item, link_id, &mut found);
        found
    }

    /// First item with the given linkId.
    pub fn find_item(&self, link_id: &str) -> Option<&QuestionnaireResponseItem> {
        self.find_items(link_id).into_iter().next()
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl Default for QuestionnaireResponse {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_items<'a>(
    items: &'a [QuestionnaireResponseItem],
    link_id: &str,
    found: &mut Vec<&'a QuestionnaireResponseItem>,
) {
    for item in items {
        if item.link_id == link_id {
            found.push(item);
        }
        for child in item.children() {
            collect_items(std::slice::from_ref(child), link_id, found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_value_serializes_as_value_x() {
        let answer = QuestionnaireResponseAnswer::new(AnswerValue::Coding(
            Coding::new("http://snomed.info/sct", "44054006").with_display("Diabetes"),
        ));

        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            json!({
                "valueCoding": {
                    "system": "http://snomed.info/sct",
                    "code": "44054006",
                    "display": "Diabetes"
                }
            })
        );

        let integer = QuestionnaireResponseAnswer::new(AnswerValue::Integer(25));
        assert_eq!(serde_json::to_value(&integer).unwrap(), json!({"valueInteger": 25}));
    }

    #[test]
    fn test_from_element() {
        let initial = json!({"valueDate": "2000-01-01"});
        assert_eq!(
            AnswerValue::from_element(&initial),
            Some(AnswerValue::Date("2000-01-01".into()))
        );

        let option = json!({
            "valueCoding": {"system": "http://loinc.org", "code": "LA33-6", "display": "Yes"},
            "initialSelected": true
        });
        let value = AnswerValue::from_element(&option).unwrap();
        assert_eq!(value.as_coding().unwrap().code.as_deref(), Some("LA33-6"));

        assert_eq!(AnswerValue::from_element(&json!({"valueFoo": 1})), None);
        assert_eq!(AnswerValue::from_element(&json!("valueString")), None);
    }

    #[test]
    fn test_item_omits_absent_fields() {
        let item = QuestionnaireResponseItem {
            link_id: "age".into(),
            text: None,
            answer: None,
            item: None,
        };
        assert_eq!(serde_json::to_value(&item).unwrap(), json!({"linkId": "age"}));
    }

    #[test]
    fn test_find_items_descends_into_answers() {
        let response = QuestionnaireResponse {
            item: vec![QuestionnaireResponseItem {
                link_id: "smoker".into(),
                text: None,
                answer: Some(vec![QuestionnaireResponseAnswer {
                    value: AnswerValue::Boolean(true),
                    item: Some(vec![QuestionnaireResponseItem {
                        link_id: "packs".into(),
                        text: None,
                        answer: Some(vec![AnswerValue::Integer(2).into()]),
                        item: None,
                    }]),
                }]),
                item: None,
            }],
            ..QuestionnaireResponse::new()
        };

        let packs = response.find_item("packs").unwrap();
        assert_eq!(packs.answers()[0].value, AnswerValue::Integer(2));
        assert!(response.find_item("missing").is_none());
    }

    #[test]
    fn test_response_roundtrip_shape() {
        let response = QuestionnaireResponse::new();
        let json = response.to_json().unwrap();
        assert_eq!(
            json,
            json!({"resourceType": "QuestionnaireResponse", "status": "in-progress"})
        );
    }
}
