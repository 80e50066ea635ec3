//! Raw source elements, before classification and validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Open tag bag of an element.
pub type Tags = BTreeMap<String, String>;

/// Geometry type of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// A point.
    Node,
    /// An area or line, positioned at its center.
    Way,
    /// A multi-part feature, positioned at its center.
    Relation,
    /// A directory listing.
    Listing,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
            Self::Listing => "directory",
        }
    }
}

/// One fetched feature with a resolved position.
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement {
    pub element_type: ElementType,
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub tags: Tags,
}

impl RawElement {
    pub fn new(element_type: ElementType, id: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            element_type,
            id: id.into(),
            lat,
            lon,
            tags: Tags::new(),
        }
    }

    /// Builder-style tag insertion.
    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Identity used for upserts, e.g. `node/123` or `directory:42`.
    pub fn external_id(&self) -> String {
        match self.element_type {
            ElementType::Listing => format!("directory:{}", self.id),
            other => format!("{}/{}", other.as_str(), self.id),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// First present value among several keys.
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// Tag present with a value other than `no`.
    pub fn has_yes(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v != "no")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_ids() {
        assert_eq!(
            RawElement::new(ElementType::Node, "12", 1.0, 2.0).external_id(),
            "node/12"
        );
        assert_eq!(
            RawElement::new(ElementType::Relation, "7", 1.0, 2.0).external_id(),
            "relation/7"
        );
        assert_eq!(
            RawElement::new(ElementType::Listing, "abc", 1.0, 2.0).external_id(),
            "directory:abc"
        );
    }

    #[test]
    fn test_tag_helpers() {
        let el = RawElement::new(ElementType::Way, "1", 0.0, 0.0)
            .tag("bridge", "yes")
            .tag("tunnel", "no")
            .tag("contact:phone", "+1 555");
        assert!(el.has_yes("bridge"));
        assert!(!el.has_yes("tunnel"));
        assert!(!el.has_yes("covered"));
        assert_eq!(el.first_of(&["phone", "contact:phone"]), Some("+1 555"));
    }
}
