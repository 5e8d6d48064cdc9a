//! Label annotations and the record they are persisted into.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schemaless document as handed to a [`DocumentStore`](crate::services::document_store::DocumentStore).
pub type Document = Map<String, Value>;

/// One label returned by the detection service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LabelAnnotation {
    /// Knowledge-graph entity id, e.g. `/m/01yrx`.
    #[serde(default)]
    pub mid: Option<String>,

    /// Human-readable label text, e.g. `Cat`.
    #[serde(default)]
    pub description: String,

    /// Confidence in `[0, 1]`.
    #[serde(default)]
    pub score: f32,

    #[serde(default)]
    pub topicality: f32,
}

/// Labels persisted for one processed image, stored under its converted name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub image_path: String,

    /// Label descriptions in the order the service returned them.
    pub information: Vec<String>,
}

impl ImageRecord {
    pub fn new(image_path: impl Into<String>, labels: Vec<LabelAnnotation>) -> Self {
        Self {
            image_path: image_path.into(),
            information: labels.into_iter().map(|label| label.description).collect(),
        }
    }

    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert("imagePath".into(), Value::String(self.image_path.clone()));
        document.insert(
            "information".into(),
            Value::Array(
                self.information
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn label(description: &str, score: f32) -> LabelAnnotation {
        LabelAnnotation {
            mid: None,
            description: description.into(),
            score,
            topicality: score,
        }
    }

    #[test]
    fn keeps_service_order_without_resorting() {
        let record = ImageRecord::new(
            "photos/dog_converted.jpg",
            vec![label("Pet", 0.4), label("Cat", 0.9), label("Whiskers", 0.7)],
        );
        assert_eq!(record.information, vec!["Pet", "Cat", "Whiskers"]);
    }

    #[test]
    fn document_has_exactly_two_fields() {
        let record = ImageRecord::new(
            "photos/dog_converted.jpg",
            vec![label("Cat", 0.9), label("Pet", 0.8)],
        );
        assert_eq!(
            Value::Object(record.to_document()),
            json!({
                "imagePath": "photos/dog_converted.jpg",
                "information": ["Cat", "Pet"]
            })
        );
    }

    #[test]
    fn annotation_tolerates_missing_fields() {
        let parsed: LabelAnnotation =
            serde_json::from_str(r#"{"description":"Dog","score":0.97}"#).unwrap();
        assert_eq!(parsed.description, "Dog");
        assert_eq!(parsed.mid, None);
    }
}
