//! Content Domain Models
//!
//! Payload types for the content hierarchy: folders (tree nodes) and content
//! items (leaves attached to a folder, never parents themselves).

use serde::{Deserialize, Serialize};

/// A content folder.
///
/// The folder's position in the hierarchy is owned by the tree store; this
/// struct is the payload row joined with the node's parent reference at read
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFolder {
    pub id: String,
    pub name: String,
    /// Parent folder ID (`None` = top-level folder)
    pub parent_id: Option<String>,
}

/// The value type of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    String,
    Number,
}

impl ContentKind {
    /// Database column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
        }
    }

    /// Parse the database column representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            _ => None,
        }
    }
}

/// A content item: a leaf attached to a folder.
///
/// Items are excluded from cycle checks and descendant traversal; they are
/// removed together with their folder subtree on cascading delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    /// The folder this item is parented to
    pub folder_id: String,
    pub name: String,
    pub kind: ContentKind,
    /// The item's value, serialized as text; interpreted per `kind`
    pub data: Option<String>,
}

impl ContentItem {
    /// The item's value as JSON, typed per `kind`, for API responses.
    ///
    /// A `number` item whose stored text does not parse falls back to the
    /// raw string rather than dropping the value.
    pub fn data_value(&self) -> serde_json::Value {
        match (&self.data, self.kind) {
            (None, _) => serde_json::Value::Null,
            (Some(s), ContentKind::Number) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(s.clone())),
            (Some(s), ContentKind::String) => serde_json::Value::String(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_round_trip() {
        assert_eq!(ContentKind::parse("string"), Some(ContentKind::String));
        assert_eq!(ContentKind::parse("number"), Some(ContentKind::Number));
        assert_eq!(ContentKind::parse("blob"), None);
        assert_eq!(ContentKind::Number.as_str(), "number");
    }

    #[test]
    fn test_data_value_typed_per_kind() {
        let mut item = ContentItem {
            id: "i1".to_string(),
            folder_id: "f1".to_string(),
            name: "answer".to_string(),
            kind: ContentKind::Number,
            data: Some("42".to_string()),
        };
        assert_eq!(item.data_value(), serde_json::json!(42.0));

        item.kind = ContentKind::String;
        assert_eq!(item.data_value(), serde_json::json!("42"));

        item.kind = ContentKind::Number;
        item.data = Some("not a number".to_string());
        assert_eq!(item.data_value(), serde_json::json!("not a number"));

        item.data = None;
        assert_eq!(item.data_value(), serde_json::Value::Null);
    }
}
