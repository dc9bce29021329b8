//! Relationship paths.

use crate::catalog::Direction;
use crate::error::Error;
use relcontent_proto::FilterExpr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recursion bounds of a relationship step.
///
/// `[1, 1]` (the default) is a plain single hop. `max = None` is unbounded
/// and relies on instance-key deduplication to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepthRange {
    /// Minimum depth at which reached instances are emitted.
    #[serde(default = "default_min_depth")]
    pub min: u32,
    /// Maximum depth, `None` for unbounded.
    #[serde(default = "default_max_depth")]
    pub max: Option<u32>,
}

fn default_min_depth() -> u32 {
    1
}

fn default_max_depth() -> Option<u32> {
    Some(1)
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min: 1,
            max: Some(1),
        }
    }
}

impl DepthRange {
    /// Create a bounded range.
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// Unbounded recursion starting at depth 1.
    pub fn unbounded() -> Self {
        Self { min: 1, max: None }
    }

    /// Whether the step expands over more than one hop.
    pub fn is_recursive(&self) -> bool {
        match self.max {
            None => true,
            Some(max) => max > 1,
        }
    }

    /// Whether instances reached at `depth` are emitted.
    pub fn contains(&self, depth: u32) -> bool {
        depth >= self.min && self.max.map_or(true, |max| depth <= max)
    }

    /// Whether expansion continues past `depth`.
    pub fn continues_after(&self, depth: u32) -> bool {
        self.max.map_or(true, |max| depth < max)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.min == 0 {
            return Err(Error::InvalidPath("minimum depth must be at least 1".into()));
        }
        if let Some(max) = self.max {
            if max < self.min {
                return Err(Error::InvalidPath(format!(
                    "depth range [{}, {}] is empty",
                    self.min, max
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for DepthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, *]", self.min),
        }
    }
}

/// One step of a relationship path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipStep {
    /// Relationship type name.
    pub relationship: String,
    /// Traversal direction.
    #[serde(default)]
    pub direction: Direction,
    /// Explicit target types, narrowing the relationship's own constraint.
    #[serde(default)]
    pub target_types: Option<Vec<String>>,
    /// Expand explicit target types to their derived types.
    #[serde(default)]
    pub polymorphic: bool,
    /// Instance filter applied to reached targets.
    #[serde(default)]
    pub filter: Option<FilterExpr>,
    /// Recursion bounds.
    #[serde(default)]
    pub depth: DepthRange,
}

impl RelationshipStep {
    /// Step following `relationship` from source to target.
    pub fn forward(relationship: impl Into<String>) -> Self {
        Self::new(relationship, Direction::Forward)
    }

    /// Step following `relationship` from target to source.
    pub fn backward(relationship: impl Into<String>) -> Self {
        Self::new(relationship, Direction::Backward)
    }

    /// Create a step.
    pub fn new(relationship: impl Into<String>, direction: Direction) -> Self {
        Self {
            relationship: relationship.into(),
            direction,
            target_types: None,
            polymorphic: false,
            filter: None,
            depth: DepthRange::default(),
        }
    }

    /// Restrict targets to the given types.
    pub fn to_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Expand explicit target types polymorphically.
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    /// Set the instance filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the recursion bounds.
    pub fn with_depth(mut self, depth: DepthRange) -> Self {
        self.depth = depth;
        self
    }

    /// Recurse without a depth bound.
    pub fn recursive(self) -> Self {
        self.with_depth(DepthRange::unbounded())
    }
}

/// Ordered, non-empty sequence of relationship steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipPath {
    steps: Vec<RelationshipStep>,
}

impl RelationshipPath {
    /// Create a path, rejecting an empty step list.
    pub fn new(steps: Vec<RelationshipStep>) -> Result<Self, Error> {
        let path = Self { steps };
        path.validate()?;
        Ok(path)
    }

    /// Single-step path.
    pub fn single(step: RelationshipStep) -> Self {
        Self { steps: vec![step] }
    }

    /// Append a step.
    pub fn then(mut self, step: RelationshipStep) -> Self {
        self.steps.push(step);
        self
    }

    /// The steps of this path.
    pub fn steps(&self) -> &[RelationshipStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the path has no steps. Only possible for deserialized paths,
    /// which fail validation.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Ordered (relationship, direction) pairs.
    pub fn signature(&self) -> Vec<(String, Direction)> {
        self.steps
            .iter()
            .map(|s| (s.relationship.clone(), s.direction))
            .collect()
    }

    /// Check the path is non-empty and every depth range is well formed.
    pub fn validate(&self) -> Result<(), Error> {
        if self.steps.is_empty() {
            return Err(Error::InvalidPath("relationship path has no steps".into()));
        }
        for step in &self.steps {
            step.depth.validate()?;
        }
        Ok(())
    }
}

impl From<RelationshipStep> for RelationshipPath {
    fn from(step: RelationshipStep) -> Self {
        Self::single(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_range() {
        let single = DepthRange::default();
        assert!(!single.is_recursive());
        assert!(single.contains(1));
        assert!(!single.continues_after(1));

        let unbounded = DepthRange::unbounded();
        assert!(unbounded.is_recursive());
        assert!(unbounded.contains(100));
        assert!(unbounded.continues_after(100));

        let window = DepthRange::new(2, 3);
        assert!(window.is_recursive());
        assert!(!window.contains(1));
        assert!(window.contains(3));
        assert!(!window.continues_after(3));
    }

    #[test]
    fn test_path_signature() {
        let path = RelationshipPath::single(RelationshipStep::forward("A").to_types(["X"]))
            .then(RelationshipStep::backward("B"));

        assert_eq!(
            path.signature(),
            vec![
                ("A".to_string(), Direction::Forward),
                ("B".to_string(), Direction::Backward)
            ]
        );
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(matches!(
            RelationshipPath::new(vec![]),
            Err(Error::InvalidPath(_))
        ));

        let bad = RelationshipPath::single(
            RelationshipStep::forward("A").with_depth(DepthRange::new(3, 2)),
        );
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_step_from_json() {
        let step: RelationshipStep = serde_json::from_str(
            r#"{"relationship": "Owns", "direction": "backward", "depth": {"max": null}}"#,
        )
        .unwrap();
        assert_eq!(step.direction, Direction::Backward);
        assert_eq!(step.depth, DepthRange::unbounded());
        assert!(step.target_types.is_none());
    }
}
