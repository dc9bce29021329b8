//! Property selectors.

use serde::{Deserialize, Serialize};

/// Selects properties of a content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertySelector {
    /// Every non-hidden property.
    All,
    /// No properties.
    None,
    /// One property, with display overrides.
    Named(PropertyOverride),
}

impl PropertySelector {
    /// Select one property by name.
    pub fn named(name: impl Into<String>) -> Self {
        PropertySelector::Named(PropertyOverride::new(name))
    }
}

impl From<PropertyOverride> for PropertySelector {
    fn from(o: PropertyOverride) -> Self {
        PropertySelector::Named(o)
    }
}

/// A named property with display overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyOverride {
    /// Property name.
    pub name: String,
    /// Field priority. Falls back to the owning specification's priority.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Label override.
    #[serde(default)]
    pub label: Option<String>,
    /// Category reference.
    #[serde(default)]
    pub category: Option<String>,
    /// Renderer reference.
    #[serde(default)]
    pub renderer: Option<String>,
    /// Editor reference.
    #[serde(default)]
    pub editor: Option<String>,
    /// `false` removes the property from the field set.
    #[serde(default = "default_displayed")]
    pub displayed: bool,
    /// Contribute nothing when an equal-or-higher priority field for the
    /// same property already exists.
    #[serde(default)]
    pub skip_if_duplicate: bool,
}

fn default_displayed() -> bool {
    true
}

impl PropertyOverride {
    /// Create an override that only names the property.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: None,
            label: None,
            category: None,
            renderer: None,
            editor: None,
            displayed: true,
            skip_if_duplicate: false,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the category reference.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the renderer reference.
    pub fn with_renderer(mut self, renderer: impl Into<String>) -> Self {
        self.renderer = Some(renderer.into());
        self
    }

    /// Set the editor reference.
    pub fn with_editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = Some(editor.into());
        self
    }

    /// Hide the property.
    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    /// Skip when a duplicate of equal or higher priority exists.
    pub fn skip_if_duplicate(mut self) -> Self {
        self.skip_if_duplicate = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_json() {
        let selectors: Vec<PropertySelector> = serde_json::from_str(
            r#"["all", "none", {"named": {"name": "Prop", "label": "P", "skip_if_duplicate": true}}]"#,
        )
        .unwrap();

        assert_eq!(selectors[0], PropertySelector::All);
        assert_eq!(selectors[1], PropertySelector::None);
        match &selectors[2] {
            PropertySelector::Named(o) => {
                assert_eq!(o.name, "Prop");
                assert!(o.displayed);
                assert!(o.skip_if_duplicate);
                assert_eq!(o.priority, None);
            }
            other => panic!("Expected Named, got {:?}", other),
        }
    }

    #[test]
    fn test_override_builder() {
        let o = PropertyOverride::new("CodeValue")
            .with_priority(2000)
            .with_label("Code")
            .with_renderer("code-renderer")
            .hidden();

        assert_eq!(o.priority, Some(2000));
        assert_eq!(o.label.as_deref(), Some("Code"));
        assert!(!o.displayed);
    }
}
