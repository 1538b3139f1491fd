//! Submission payloads - nested measure input and its flattening
//!
//! Clients submit measures as arbitrarily nested maps and lists. Before
//! reaching the measure registry they are flattened into dotted paths:
//!
//! ```text
//! {"durations": {"execution": 120, "reaction": 80}, "clicks": [3, 4]}
//!   → durations.execution = 120
//!     durations.reaction  = 80
//!     clicks.0            = 3
//!     clicks.1            = 4
//! ```
//!
//! Null leaves are dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::experiment::Scalar;

/// Nested measure input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasureInput {
    /// Absent value, skipped by flattening.
    #[default]
    Null,
    /// Leaf value.
    Scalar(Scalar),
    /// Sequence; items are addressed by index.
    List(Vec<MeasureInput>),
    /// Mapping; entries are addressed by key.
    Map(BTreeMap<String, MeasureInput>),
}

impl MeasureInput {
    /// Build a map input from `(key, input)` pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Whether there is nothing to record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Scalar(_) => false,
            Self::List(items) => items.iter().all(Self::is_empty),
            Self::Map(entries) => entries.values().all(Self::is_empty),
        }
    }
}

macro_rules! scalar_input {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for MeasureInput {
                fn from(value: $ty) -> Self {
                    Self::Scalar(Scalar::from(value))
                }
            }
        )*
    };
}

scalar_input!(bool, i32, i64, f64, &str, String);

impl From<Scalar> for MeasureInput {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<serde_json::Value> for MeasureInput {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            Value::Number(n) => n.as_i64().map_or_else(
                || Self::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
                |i| Self::Scalar(Scalar::Integer(i)),
            ),
            Value::String(s) => Self::Scalar(Scalar::Text(s)),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Flatten nested input into `(dotted path, value)` pairs, skipping nulls.
///
/// A bare scalar at the root flattens to the empty path.
#[must_use]
pub fn flatten_measures(input: &MeasureInput) -> Vec<(String, Scalar)> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    walk(input, &mut path, &mut out);
    out
}

fn walk(input: &MeasureInput, path: &mut Vec<String>, out: &mut Vec<(String, Scalar)>) {
    match input {
        MeasureInput::Null => {}
        MeasureInput::Scalar(value) => out.push((path.join("."), value.clone())),
        MeasureInput::List(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(index.to_string());
                walk(item, path, out);
                path.pop();
            }
        }
        MeasureInput::Map(entries) => {
            for (key, item) in entries {
                path.push(key.clone());
                walk(item, path, out);
                path.pop();
            }
        }
    }
}

/// A trial result as sent by a run client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialSubmission {
    /// Lock token of the run.
    pub token: String,
    /// Trial-level measures.
    #[serde(default)]
    pub measures: MeasureInput,
    /// Event-level measures, one entry per event in order.
    #[serde(default)]
    pub events: Vec<MeasureInput>,
}

impl TrialSubmission {
    /// Create a submission without measures.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Set the trial-level measures.
    #[must_use]
    pub fn measures(mut self, measures: impl Into<MeasureInput>) -> Self {
        self.measures = measures.into();
        self
    }

    /// Append an event.
    #[must_use]
    pub fn event(mut self, event: impl Into<MeasureInput>) -> Self {
        self.events.push(event.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested() {
        let input = MeasureInput::from(json!({
            "durations": {"execution": 120, "reaction": 80.5},
            "clicks": [3, null, 4],
            "ignored": null
        }));
        let flat = flatten_measures(&input);
        assert_eq!(
            flat,
            vec![
                ("clicks.0".to_string(), Scalar::Integer(3)),
                ("clicks.2".to_string(), Scalar::Integer(4)),
                ("durations.execution".to_string(), Scalar::Integer(120)),
                ("durations.reaction".to_string(), Scalar::Float(80.5)),
            ]
        );
    }

    #[test]
    fn test_flatten_root_scalar() {
        let flat = flatten_measures(&MeasureInput::from("x"));
        assert_eq!(flat, vec![(String::new(), Scalar::Text("x".to_string()))]);
        assert!(flatten_measures(&MeasureInput::Null).is_empty());
    }

    #[test]
    fn test_is_empty() {
        assert!(MeasureInput::from(json!({"a": null, "b": []})).is_empty());
        assert!(!MeasureInput::from(json!({"a": [null, 1]})).is_empty());
    }

    #[test]
    fn test_submission_deserialize() {
        let submission: TrialSubmission = serde_json::from_value(json!({
            "token": "tok",
            "measures": {"time": 512},
            "events": [{"x": 1, "y": 2}, {"x": 3, "y": 4}]
        }))
        .unwrap();
        assert_eq!(submission.token, "tok");
        assert_eq!(submission.events.len(), 2);
        assert_eq!(
            flatten_measures(&submission.measures),
            vec![("time".to_string(), Scalar::Integer(512))]
        );
    }

    #[test]
    fn test_submission_builder() {
        let submission = TrialSubmission::new("tok")
            .measures(MeasureInput::map([("time", 1)]))
            .event(MeasureInput::map([("x", 1.5)]));
        assert_eq!(submission.events.len(), 1);
        assert!(!submission.measures.is_empty());
    }
}
