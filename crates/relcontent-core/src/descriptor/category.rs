//! Display categories.

use serde::Serialize;

/// Id of the root category every descriptor has.
pub const DEFAULT_CATEGORY_ID: &str = "default";

/// A node of the category tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: String,
    pub label: String,
    pub priority: i32,
    pub auto_expand: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Flattened category tree in insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct CategoryTree {
    categories: Vec<Category>,
}

impl CategoryTree {
    /// Create a tree holding only the default category.
    pub fn with_default(label: impl Into<String>) -> Self {
        Self {
            categories: vec![Category {
                id: DEFAULT_CATEGORY_ID.to_string(),
                label: label.into(),
                priority: 0,
                auto_expand: true,
                parent: None,
            }],
        }
    }

    /// Get a category by id.
    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Check if a category exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Add a category unless one with the same id exists.
    pub fn insert(&mut self, category: Category) {
        if !self.contains(&category.id) {
            self.categories.push(category);
        }
    }

    /// Re-parent a category.
    pub(crate) fn set_parent(&mut self, id: &str, parent: &str) {
        if let Some(category) = self.categories.iter_mut().find(|c| c.id == id) {
            category.parent = Some(parent.to_string());
        }
    }

    /// Check whether `ancestor` is `id` or one of its ancestors.
    pub fn has_ancestor(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id);
        let mut hops = 0;
        while let Some(cid) = current {
            if cid == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.categories.len() {
                break;
            }
            current = self.get(cid).and_then(|c| c.parent.as_deref());
        }
        false
    }

    /// Direct children of a category.
    pub fn children<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a Category> + 'a {
        self.categories
            .iter()
            .filter(move |c| c.parent.as_deref() == Some(parent))
    }

    /// All categories.
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Check if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Keep only the categories in `used`, their ancestors and the default
    /// category.
    pub(crate) fn retain_used<'a>(&mut self, used: impl IntoIterator<Item = &'a str>) {
        let mut keep: Vec<String> = vec![DEFAULT_CATEGORY_ID.to_string()];
        for id in used {
            let mut current = Some(id.to_string());
            while let Some(cid) = current {
                if keep.contains(&cid) {
                    break;
                }
                current = self.get(&cid).and_then(|c| c.parent.clone());
                keep.push(cid);
            }
        }
        self.categories.retain(|c| keep.contains(&c.id));
    }
}
