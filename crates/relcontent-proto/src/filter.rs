//! Instance filter expressions.
//!
//! Filters are attached to relationship steps and related content
//! specifications. They are evaluated by the instance provider against the
//! properties of each candidate target instance; excluded instances never
//! reach child recursion.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Filter expression over an instance's properties.
///
/// And/Or hold a flat list of [`SimpleFilter`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    /// Property equals value.
    Eq { field: String, value: Value },
    /// Property not equals value.
    Ne { field: String, value: Value },
    /// Property less than value.
    Lt { field: String, value: Value },
    /// Property less than or equal to value.
    Le { field: String, value: Value },
    /// Property greater than value.
    Gt { field: String, value: Value },
    /// Property greater than or equal to value.
    Ge { field: String, value: Value },
    /// Property is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Property is not in a set of values.
    NotIn { field: String, values: Vec<Value> },
    /// Property is null or absent.
    IsNull { field: String },
    /// Property is present and not null.
    IsNotNull { field: String },
    /// Property matches a LIKE pattern.
    Like { field: String, pattern: String },
    /// All conditions must be true.
    And(Vec<SimpleFilter>),
    /// At least one condition must be true.
    Or(Vec<SimpleFilter>),
}

/// A simple (non-compound) filter for use in And/Or expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleFilter {
    /// Property equals value.
    Eq { field: String, value: Value },
    /// Property not equals value.
    Ne { field: String, value: Value },
    /// Property less than value.
    Lt { field: String, value: Value },
    /// Property greater than value.
    Gt { field: String, value: Value },
    /// Property is null or absent.
    IsNull { field: String },
    /// Property is present and not null.
    IsNotNull { field: String },
    /// Property matches a LIKE pattern.
    Like { field: String, pattern: String },
}

impl SimpleFilter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        SimpleFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        SimpleFilter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IS NULL filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        SimpleFilter::IsNull {
            field: field.into(),
        }
    }
}

impl FilterExpr {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN filter.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::In {
            field: field.into(),
            values,
        }
    }

    /// Create an IS NOT NULL filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNotNull {
            field: field.into(),
        }
    }

    /// Create a LIKE filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        FilterExpr::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Combine with AND.
    pub fn and(filters: Vec<SimpleFilter>) -> Self {
        FilterExpr::And(filters)
    }

    /// Combine with OR.
    pub fn or(filters: Vec<SimpleFilter>) -> Self {
        FilterExpr::Or(filters)
    }

    /// Conjunction of two filters where either may be absent.
    ///
    /// Compound filters cannot nest, so two compound filters are combined by
    /// the caller evaluating both; this helper only returns the single
    /// filter that remains when one side is missing.
    pub fn merge_optional(a: Option<&FilterExpr>, b: Option<&FilterExpr>) -> Vec<FilterExpr> {
        a.into_iter().chain(b).cloned().collect()
    }
}
