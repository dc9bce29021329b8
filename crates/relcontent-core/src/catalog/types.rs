//! Core type definitions for the catalog.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar data types of instance properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    #[default]
    String,
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarType::Int64 | ScalarType::Float64)
    }
}

/// Multiplicity of one relationship end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Multiplicity {
    /// `0..1`
    #[serde(rename = "0..1")]
    ZeroOrOne,
    /// `1..1`
    #[serde(rename = "1..1")]
    ExactlyOne,
    /// `0..*`
    #[default]
    #[serde(rename = "0..*")]
    ZeroOrMany,
    /// `1..*`
    #[serde(rename = "1..*")]
    OneOrMany,
}

impl Multiplicity {
    /// Whether more than one instance may sit at this end.
    pub fn is_many(&self) -> bool {
        matches!(self, Multiplicity::ZeroOrMany | Multiplicity::OneOrMany)
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Multiplicity::ZeroOrOne => "0..1",
            Multiplicity::ExactlyOne => "1..1",
            Multiplicity::ZeroOrMany => "0..*",
            Multiplicity::OneOrMany => "1..*",
        };
        f.write_str(s)
    }
}

/// Traversal direction of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Source to target.
    #[default]
    Forward,
    /// Target to source.
    Backward,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Backward => f.write_str("backward"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplicity() {
        assert!(Multiplicity::ZeroOrMany.is_many());
        assert!(Multiplicity::OneOrMany.is_many());
        assert!(!Multiplicity::ZeroOrOne.is_many());
        assert!(!Multiplicity::ExactlyOne.is_many());

        let json = serde_json::to_string(&Multiplicity::ZeroOrOne).unwrap();
        assert_eq!(json, r#""0..1""#);
        let parsed: Multiplicity = serde_json::from_str(r#""1..*""#).unwrap();
        assert_eq!(parsed, Multiplicity::OneOrMany);
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Forward.reverse(), Direction::Backward);
        assert_eq!(Direction::Backward.reverse(), Direction::Forward);
    }

    #[test]
    fn test_scalar_type_checks() {
        assert!(ScalarType::Int64.is_numeric());
        assert!(ScalarType::Float64.is_numeric());
        assert!(!ScalarType::String.is_numeric());
        assert!(!ScalarType::Bool.is_numeric());
    }
}
