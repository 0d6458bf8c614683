//! Answer coercion.
//!
//! Turns raw evaluated values into typed answers for a given item. The rules
//! are tried in a fixed order and the first match wins:
//!
//! 1. a static `answerOption` whose code or literal value matches
//! 2. a native boolean or number on a boolean/decimal/integer/quantity item
//! 3. a Quantity-shaped object
//! 4. a Coding-, CodeableConcept-, Reference- or Attachment-shaped object
//! 5. a bare string on an item bound to an `answerValueSet` (deferred)
//! 6. a string in FHIR date/dateTime/time grammar on a temporal item
//! 7. a plain string (`valueUri` for url items)
//!
//! Coercion never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::questionnaire::{ItemType, QuestionnaireItem};
use crate::response::{AnswerValue, Attachment, Coding, Quantity, Reference};

/// FHIR dateTime regex (partial dates allowed, time requires a zone).
static DATETIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?$"
    ).expect("Invalid dateTime regex")
});

/// FHIR date regex: YYYY, YYYY-MM, or YYYY-MM-DD
static DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?$",
    )
    .expect("Invalid date regex")
});

/// FHIR time regex: HH:MM:SS(.sss)
static TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?$")
        .expect("Invalid time regex")
});

/// Result of coercing one raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    /// A finished answer.
    Final(AnswerValue),
    /// A bare code awaiting value set expansion.
    Pending(String),
}

impl Coerced {
    /// The answer as it stands before reconciliation.
    pub fn into_provisional(self) -> AnswerValue {
        match self {
            Self::Final(value) => value,
            Self::Pending(code) => AnswerValue::String(code),
        }
    }
}

/// Coerce an evaluated collection for `item`.
///
/// Non-repeating items keep only the first element. `null`s are skipped.
pub fn coerce_all(item: &QuestionnaireItem, values: &[Value]) -> Vec<Coerced> {
    let values = values.iter().filter(|v| !v.is_null());
    if item.repeats {
        values.map(|v| coerce(item, v)).collect()
    } else {
        values.take(1).map(|v| coerce(item, v)).collect()
    }
}

/// Coerce a single raw value for `item`.
pub fn coerce(item: &QuestionnaireItem, raw: &Value) -> Coerced {
    if let Some(option) = match_option(item, raw) {
        return Coerced::Final(option);
    }
    if let Some(native) = coerce_native(item.item_type, raw) {
        return Coerced::Final(native);
    }
    if let Some(shaped) = coerce_shape(item.item_type, raw) {
        return Coerced::Final(shaped);
    }
    if let Value::String(s) = raw {
        if item.answer_constraint.value_set().is_some() {
            return Coerced::Pending(s.clone());
        }
        if let Some(temporal) = coerce_temporal(item.item_type, s) {
            return Coerced::Final(temporal);
        }
    }
    Coerced::Final(fallback(item.item_type, raw))
}

fn match_option(item: &QuestionnaireItem, raw: &Value) -> Option<AnswerValue> {
    item.answer_constraint
        .options()
        .iter()
        .map(|option| &option.value)
        .find(|value| option_matches(value, raw))
        .cloned()
}

fn option_matches(option: &AnswerValue, raw: &Value) -> bool {
    match (option, raw) {
        (AnswerValue::Coding(coding), Value::String(s)) => coding.code.as_deref() == Some(s.as_str()),
        (AnswerValue::Coding(coding), Value::Object(obj)) => {
            let code = obj.get("code").and_then(|v| v.as_str());
            let system = obj.get("system").and_then(|v| v.as_str());
            code.is_some()
                && coding.code.as_deref() == code
                && (system.is_none() || coding.system.is_none() || coding.system.as_deref() == system)
        }
        (AnswerValue::Integer(i), Value::Number(n)) => n.as_i64() == Some(*i),
        (AnswerValue::Decimal(d), Value::Number(n)) => n.as_f64() == Some(*d),
        (
            AnswerValue::String(s)
            | AnswerValue::Uri(s)
            | AnswerValue::Date(s)
            | AnswerValue::DateTime(s)
            | AnswerValue::Time(s),
            Value::String(raw),
        ) => s == raw,
        (AnswerValue::Reference(reference), Value::Object(obj)) => {
            reference.reference.is_some()
                && reference.reference.as_deref() == obj.get("reference").and_then(|v| v.as_str())
        }
        _ => false,
    }
}

fn coerce_native(kind: ItemType, raw: &Value) -> Option<AnswerValue> {
    match (kind, raw) {
        (ItemType::Boolean, Value::Bool(b)) => Some(AnswerValue::Boolean(*b)),
        (ItemType::Integer, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(AnswerValue::Integer),
        (ItemType::Decimal, Value::Number(n)) => n.as_f64().map(AnswerValue::Decimal),
        (ItemType::Quantity, Value::Number(n)) => Some(AnswerValue::Quantity(Quantity {
            value: n.as_f64(),
            ..Default::default()
        })),
        _ => None,
    }
}

fn coerce_shape(kind: ItemType, raw: &Value) -> Option<AnswerValue> {
    let obj = raw.as_object()?;

    let has = |key: &str| obj.get(key).is_some_and(|v| v.is_string());

    if obj.get("value").is_some_and(|v| v.is_number()) && (has("unit") || has("code") || has("system")) {
        return serde_json::from_value::<Quantity>(raw.clone())
            .ok()
            .map(AnswerValue::Quantity);
    }

    if has("code") && has("system") {
        return serde_json::from_value::<Coding>(raw.clone())
            .ok()
            .map(AnswerValue::Coding);
    }

    // CodeableConcept contributes its first coding
    if let Some(first) = obj
        .get("coding")
        .and_then(|v| v.as_array())
        .and_then(|codings| codings.iter().find(|c| c.get("code").is_some()))
    {
        return serde_json::from_value::<Coding>(first.clone())
            .ok()
            .map(AnswerValue::Coding);
    }

    if has("reference") {
        return serde_json::from_value::<Reference>(raw.clone())
            .ok()
            .map(AnswerValue::Reference);
    }

    if kind == ItemType::Attachment && (has("url") || has("data") || has("contentType")) {
        return serde_json::from_value::<Attachment>(raw.clone())
            .ok()
            .map(AnswerValue::Attachment);
    }

    None
}

fn coerce_temporal(kind: ItemType, raw: &str) -> Option<AnswerValue> {
    // FHIRPath literals carry a leading '@'
    let s = raw.strip_prefix('@').unwrap_or(raw);
    match kind {
        ItemType::Date => {
            if DATE_REGEX.is_match(s) {
                return Some(AnswerValue::Date(s.to_string()));
            }
            // Only a well-formed dateTime truncates to its date part
            if !DATETIME_REGEX.is_match(s) {
                return None;
            }
            s.split_once('T').map(|(date, _)| AnswerValue::Date(date.to_string()))
        }
        ItemType::DateTime => DATETIME_REGEX
            .is_match(s)
            .then(|| AnswerValue::DateTime(s.to_string())),
        ItemType::Time => {
            let s = s.strip_prefix('T').unwrap_or(s);
            TIME_REGEX.is_match(s).then(|| AnswerValue::Time(s.to_string()))
        }
        _ => None,
    }
}

fn fallback(kind: ItemType, raw: &Value) -> AnswerValue {
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) if kind == ItemType::Integer => {
            // Non-integral numbers are not truncated
            return match n.as_f64() {
                Some(f) => AnswerValue::Decimal(f),
                None => AnswerValue::String(n.to_string()),
            };
        }
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    match kind {
        ItemType::Url => AnswerValue::Uri(text),
        _ => AnswerValue::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questionnaire::Questionnaire;
    use serde_json::json;

    fn item(def: Value) -> QuestionnaireItem {
        let q = Questionnaire::from_json(&json!({
            "resourceType": "Questionnaire",
            "item": [def]
        }))
        .unwrap();
        q.items.into_iter().next().unwrap()
    }

    fn final_value(coerced: Coerced) -> AnswerValue {
        match coerced {
            Coerced::Final(value) => value,
            Coerced::Pending(code) => panic!("unexpected pending {code}"),
        }
    }

    #[test]
    fn test_option_match_keeps_display() {
        let smoker = item(json!({
            "linkId": "smoker",
            "type": "choice",
            "answerOption": [
                {"valueCoding": {"system": "http://loinc.org", "code": "LA33-6", "display": "Yes"}},
                {"valueCoding": {"system": "http://loinc.org", "code": "LA32-8", "display": "No"}}
            ]
        }));

        let value = final_value(coerce(&smoker, &json!("LA32-8")));
        assert_eq!(value.as_coding().unwrap().display.as_deref(), Some("No"));

        let value = final_value(coerce(
            &smoker,
            &json!({"system": "http://loinc.org", "code": "LA33-6"}),
        ));
        assert_eq!(value.as_coding().unwrap().display.as_deref(), Some("Yes"));

        // No option matches: falls through to the shape rules
        let value = final_value(coerce(&smoker, &json!({"system": "http://other", "code": "LA33-6"})));
        assert_eq!(value.as_coding().unwrap().display, None);
    }

    #[test]
    fn test_literal_option_match() {
        let size = item(json!({
            "linkId": "size",
            "type": "integer",
            "answerOption": [{"valueInteger": 1}, {"valueInteger": 2}]
        }));
        assert_eq!(final_value(coerce(&size, &json!(2))), AnswerValue::Integer(2));
    }

    #[test]
    fn test_native_values() {
        let flag = item(json!({"linkId": "flag", "type": "boolean"}));
        assert_eq!(final_value(coerce(&flag, &json!(true))), AnswerValue::Boolean(true));

        let age = item(json!({"linkId": "age", "type": "integer"}));
        assert_eq!(final_value(coerce(&age, &json!(25))), AnswerValue::Integer(25));
        assert_eq!(final_value(coerce(&age, &json!(25.0))), AnswerValue::Integer(25));
        assert_eq!(final_value(coerce(&age, &json!(25.5))), AnswerValue::Decimal(25.5));

        let weight = item(json!({"linkId": "weight", "type": "decimal"}));
        assert_eq!(final_value(coerce(&weight, &json!(70.2))), AnswerValue::Decimal(70.2));

        // Booleans on a string item are stringified
        let text = item(json!({"linkId": "text", "type": "string"}));
        assert_eq!(
            final_value(coerce(&text, &json!(false))),
            AnswerValue::String("false".into())
        );
    }

    #[test]
    fn test_quantity_and_coding_shapes() {
        let weight = item(json!({"linkId": "weight", "type": "quantity"}));
        let value = final_value(coerce(
            &weight,
            &json!({"value": 70, "unit": "kg", "system": "http://unitsofmeasure.org", "code": "kg"}),
        ));
        assert!(matches!(value, AnswerValue::Quantity(ref q) if q.value == Some(70.0)));

        let bare = final_value(coerce(&weight, &json!(70)));
        assert!(matches!(bare, AnswerValue::Quantity(ref q) if q.unit.is_none()));

        let code = item(json!({"linkId": "code", "type": "coding"}));
        let concept = json!({
            "coding": [{"system": "http://snomed.info/sct", "code": "44054006", "display": "Diabetes"}],
            "text": "Diabetes mellitus type 2"
        });
        let value = final_value(coerce(&code, &concept));
        assert_eq!(value.as_coding().unwrap().code.as_deref(), Some("44054006"));
    }

    #[test]
    fn test_reference_and_attachment_shapes() {
        let who = item(json!({"linkId": "who", "type": "reference"}));
        let value = final_value(coerce(&who, &json!({"reference": "Practitioner/1"})));
        assert!(matches!(value, AnswerValue::Reference(_)));

        let file = item(json!({"linkId": "file", "type": "attachment"}));
        let value = final_value(coerce(&file, &json!({"url": "http://example.org/x.pdf"})));
        assert!(matches!(value, AnswerValue::Attachment(_)));

        // The same object on a string item is not an attachment
        let text = item(json!({"linkId": "text", "type": "string"}));
        let value = final_value(coerce(&text, &json!({"url": "http://example.org/x.pdf"})));
        assert_eq!(value, AnswerValue::String(r#"{"url":"http://example.org/x.pdf"}"#.into()));
    }

    #[test]
    fn test_value_set_string_is_pending() {
        let gender = item(json!({
            "linkId": "gender",
            "type": "choice",
            "answerValueSet": "http://hl7.org/fhir/ValueSet/administrative-gender"
        }));
        assert_eq!(coerce(&gender, &json!("female")), Coerced::Pending("female".into()));

        // Full codings need no deferral
        let coded = coerce(
            &gender,
            &json!({"system": "http://hl7.org/fhir/administrative-gender", "code": "female"}),
        );
        assert!(matches!(coded, Coerced::Final(AnswerValue::Coding(_))));
    }

    #[test]
    fn test_temporal_values() {
        let dob = item(json!({"linkId": "dob", "type": "date"}));
        assert_eq!(
            final_value(coerce(&dob, &json!("2000-01-01"))),
            AnswerValue::Date("2000-01-01".into())
        );
        assert_eq!(
            final_value(coerce(&dob, &json!("@2000-01-01T10:30:00Z"))),
            AnswerValue::Date("2000-01-01".into())
        );
        assert_eq!(
            final_value(coerce(&dob, &json!("yesterday"))),
            AnswerValue::String("yesterday".into())
        );
        // A valid date prefix does not rescue a malformed time part
        assert_eq!(
            final_value(coerce(&dob, &json!("2000-01-01Tgarbage"))),
            AnswerValue::String("2000-01-01Tgarbage".into())
        );

        let seen = item(json!({"linkId": "seen", "type": "dateTime"}));
        assert_eq!(
            final_value(coerce(&seen, &json!("2024-03-01T08:00:00+02:00"))),
            AnswerValue::DateTime("2024-03-01T08:00:00+02:00".into())
        );

        let at = item(json!({"linkId": "at", "type": "time"}));
        assert_eq!(
            final_value(coerce(&at, &json!("@T14:30:00"))),
            AnswerValue::Time("14:30:00".into())
        );
    }

    #[test]
    fn test_url_fallback() {
        let site = item(json!({"linkId": "site", "type": "url"}));
        assert_eq!(
            final_value(coerce(&site, &json!("https://example.org"))),
            AnswerValue::Uri("https://example.org".into())
        );
    }

    #[test]
    fn test_coerce_all_cardinality() {
        let single = item(json!({"linkId": "name", "type": "string"}));
        let values = [json!("a"), json!("b"), json!("c")];
        let coerced = coerce_all(&single, &values);
        assert_eq!(coerced, vec![Coerced::Final(AnswerValue::String("a".into()))]);

        let many = item(json!({"linkId": "names", "type": "string", "repeats": true}));
        assert_eq!(coerce_all(&many, &values).len(), 3);

        assert!(coerce_all(&single, &[Value::Null]).is_empty());
    }
}
