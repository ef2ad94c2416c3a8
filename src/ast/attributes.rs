//! Per-node attributes
//!
//! Every syntax node carries an `Attributes` payload: the source line, an
//! optional statement label, and a keyed side-table the preprocessor may use
//! for ad-hoc metadata. The side-table is never persisted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub line: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(skip)]
    data: BTreeMap<String, serde_json::Value>,
}

fn is_zero(line: &u32) -> bool {
    *line == 0
}

impl Attributes {
    pub fn at_line(line: u32) -> Self {
        Attributes {
            line,
            ..Default::default()
        }
    }

    /// True when nothing would be serialized for this payload.
    pub fn is_empty(&self) -> bool {
        self.line == 0 && self.label.is_none()
    }

    pub fn get_attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

/// Shared behavior of every syntax node.
pub trait Node {
    fn attrs(&self) -> &Attributes;
    fn attrs_mut(&mut self) -> &mut Attributes;

    fn line(&self) -> u32 {
        self.attrs().line
    }

    fn set_line(&mut self, line: u32) {
        self.attrs_mut().line = line;
    }

    fn label(&self) -> Option<&str> {
        self.attrs().label.as_deref()
    }

    fn set_label(&mut self, label: impl Into<String>)
    where
        Self: Sized,
    {
        self.attrs_mut().label = Some(label.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_side_table_not_serialized() {
        let mut attrs = Attributes::at_line(7);
        attrs.set_attribute("loop_var", json!(true));
        assert!(attrs.has_attribute("loop_var"));

        let encoded = serde_json::to_value(&attrs).unwrap();
        assert_eq!(encoded, json!({"line": 7}));

        let decoded: Attributes = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.line, 7);
        assert!(decoded.get_attribute("loop_var").is_none());
    }

    #[test]
    fn test_empty_attributes() {
        assert!(Attributes::default().is_empty());
        assert!(!Attributes::at_line(1).is_empty());
    }
}
