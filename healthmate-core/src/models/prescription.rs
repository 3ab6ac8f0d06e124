use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::fmt;

pub const FALLBACK_HEALTH_ISSUE: &str = "Unable to parse health issue";
pub const FALLBACK_LIFESTYLE_ADVICE: &str = "Consult with a physician.";

/// Structured prescription, one current record per user.
///
/// Field names on the wire match the JSON object the model is asked to
/// produce (`HealthIssue`, `Symptoms`, ...). Missing or `null` fields fall
/// back to empty values, and a bare string is accepted where a list is
/// expected. Symptoms and advice that arrive as other JSON shapes are kept
/// as their JSON text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrescriptionRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub health_issue: String,
    #[serde(default, deserialize_with = "text_items")]
    pub symptoms: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub medicines_prescribed: Vec<MedicineEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lifestyle_advice: LifestyleAdvice,
    /// Set by the store; never part of the model's JSON.
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PrescriptionRecord {
    pub fn fallback(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            health_issue: FALLBACK_HEALTH_ISSUE.to_string(),
            symptoms: Vec::new(),
            medicines_prescribed: Vec::new(),
            lifestyle_advice: LifestyleAdvice::Text(FALLBACK_LIFESTYLE_ADVICE.to_string()),
            updated_at: None,
        }
    }
}

/// A prescribed medicine: either free text or whatever object the model
/// produced for it (name/dose/frequency, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MedicineEntry {
    Text(String),
    Structured(serde_json::Value),
}

impl fmt::Display for MedicineEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MedicineEntry::Text(s) => f.write_str(s),
            MedicineEntry::Structured(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for MedicineEntry {
    fn from(s: &str) -> Self {
        MedicineEntry::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LifestyleAdvice {
    Text(String),
    Items(Vec<String>),
    Other(serde_json::Value),
}

impl Default for LifestyleAdvice {
    fn default() -> Self {
        LifestyleAdvice::Text(String::new())
    }
}

impl LifestyleAdvice {
    /// Single-paragraph form; list items are joined with single spaces.
    pub fn as_paragraph(&self) -> Cow<'_, str> {
        match self {
            LifestyleAdvice::Text(s) => Cow::Borrowed(s.as_str()),
            LifestyleAdvice::Items(items) => Cow::Owned(items.join(" ")),
            LifestyleAdvice::Other(serde_json::Value::Array(items)) => Cow::Owned(
                items
                    .iter()
                    .cloned()
                    .map(value_text)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            LifestyleAdvice::Other(v) => Cow::Owned(v.to_string()),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // `Many` first: `MedicineEntry::Structured` would otherwise swallow arrays.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::Many(v)) => v,
        Some(OneOrMany::One(t)) => vec![t],
    })
}

fn text_items<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(one_or_many::<D, serde_json::Value>(deserializer)?
        .into_iter()
        .map(value_text)
        .collect())
}

fn value_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_model_field_names() {
        let record: PrescriptionRecord = serde_json::from_value(json!({
            "Username": "alice",
            "HealthIssue": "Common cold",
            "Symptoms": ["cough", "sneezing"],
            "MedicinesPrescribed": ["Paracetamol 500mg", {"name": "Cetirizine", "dose": "10mg"}],
            "LifestyleAdvice": "Rest well."
        }))
        .unwrap();

        assert_eq!(record.health_issue, "Common cold");
        assert_eq!(record.symptoms, vec!["cough", "sneezing"]);
        assert_eq!(record.medicines_prescribed.len(), 2);
        assert_eq!(record.medicines_prescribed[0], MedicineEntry::from("Paracetamol 500mg"));
        assert_eq!(
            record.medicines_prescribed[1].to_string(),
            r#"{"dose":"10mg","name":"Cetirizine"}"#
        );
        assert_eq!(record.lifestyle_advice.as_paragraph(), "Rest well.");
    }

    #[test]
    fn test_missing_and_null_fields_default_to_empty() {
        let record: PrescriptionRecord =
            serde_json::from_value(json!({"HealthIssue": "flu", "Symptoms": null})).unwrap();
        assert_eq!(record.health_issue, "flu");
        assert!(record.symptoms.is_empty());
        assert!(record.medicines_prescribed.is_empty());
        assert_eq!(record.lifestyle_advice, LifestyleAdvice::Text(String::new()));
        assert_eq!(record.username, "");
    }

    #[test]
    fn test_bare_string_accepted_as_single_item_list() {
        let record: PrescriptionRecord =
            serde_json::from_value(json!({"Symptoms": "headache"})).unwrap();
        assert_eq!(record.symptoms, vec!["headache"]);
    }

    #[test]
    fn test_list_advice_joins_with_single_spaces() {
        let advice = LifestyleAdvice::Items(vec!["Rest".into(), "Hydrate".into()]);
        assert_eq!(advice.as_paragraph(), "Rest Hydrate");
    }

    #[test]
    fn test_structured_symptoms_become_text() {
        let record: PrescriptionRecord = serde_json::from_value(json!({
            "Symptoms": [{"name": "cough"}, "fever", 3]
        }))
        .unwrap();
        assert_eq!(record.symptoms, vec![r#"{"name":"cough"}"#, "fever", "3"]);

        let single: PrescriptionRecord =
            serde_json::from_value(json!({"Symptoms": {"name": "rash"}})).unwrap();
        assert_eq!(single.symptoms, vec![r#"{"name":"rash"}"#]);
    }

    #[test]
    fn test_object_and_mixed_advice_are_kept() {
        let record: PrescriptionRecord =
            serde_json::from_value(json!({"LifestyleAdvice": {"diet": "fluids"}})).unwrap();
        assert_eq!(
            record.lifestyle_advice,
            LifestyleAdvice::Other(json!({"diet": "fluids"}))
        );
        assert_eq!(record.lifestyle_advice.as_paragraph(), r#"{"diet":"fluids"}"#);

        let mixed: PrescriptionRecord =
            serde_json::from_value(json!({"LifestyleAdvice": ["Rest", {"sleep": "8h"}]})).unwrap();
        assert_eq!(mixed.lifestyle_advice.as_paragraph(), r#"Rest {"sleep":"8h"}"#);
    }

    #[test]
    fn test_fallback_record() {
        let record = PrescriptionRecord::fallback("bob");
        assert_eq!(record.username, "bob");
        assert_eq!(record.health_issue, FALLBACK_HEALTH_ISSUE);
        assert!(record.symptoms.is_empty());
        assert!(record.medicines_prescribed.is_empty());
        assert_eq!(record.lifestyle_advice.as_paragraph(), FALLBACK_LIFESTYLE_ADVICE);
    }
}
