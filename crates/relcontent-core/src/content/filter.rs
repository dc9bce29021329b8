//! Filter evaluation for instance providers.
//!
//! Evaluates [`FilterExpr`] instance filters against the property values of a
//! candidate target instance. A missing property behaves like null.

use relcontent_proto::{FilterExpr, SimpleFilter, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Extract all property names referenced in a filter expression.
pub fn extract_filter_fields(filter: &FilterExpr) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    match filter {
        FilterExpr::Eq { field, .. }
        | FilterExpr::Ne { field, .. }
        | FilterExpr::Lt { field, .. }
        | FilterExpr::Le { field, .. }
        | FilterExpr::Gt { field, .. }
        | FilterExpr::Ge { field, .. }
        | FilterExpr::In { field, .. }
        | FilterExpr::NotIn { field, .. }
        | FilterExpr::IsNull { field }
        | FilterExpr::IsNotNull { field }
        | FilterExpr::Like { field, .. } => {
            fields.insert(field.clone());
        }
        FilterExpr::And(simple) | FilterExpr::Or(simple) => {
            for sf in simple {
                match sf {
                    SimpleFilter::Eq { field, .. }
                    | SimpleFilter::Ne { field, .. }
                    | SimpleFilter::Lt { field, .. }
                    | SimpleFilter::Gt { field, .. }
                    | SimpleFilter::IsNull { field }
                    | SimpleFilter::IsNotNull { field }
                    | SimpleFilter::Like { field, .. } => {
                        fields.insert(field.clone());
                    }
                }
            }
        }
    }
    fields
}

type Row = BTreeMap<String, Value>;

/// Evaluates filter expressions against instance properties.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a filter expression against a property map.
    pub fn evaluate(filter: &FilterExpr, row: &Row) -> bool {
        match filter {
            FilterExpr::Eq { field, value } => {
                Self::compare_field(row, field, value, Self::values_equal)
            }
            FilterExpr::Ne { field, value } => {
                Self::compare_field(row, field, value, |a, b| !Self::values_equal(a, b))
            }
            FilterExpr::Lt { field, value } => Self::ordered(row, field, value, Ordering::is_lt),
            FilterExpr::Le { field, value } => Self::ordered(row, field, value, Ordering::is_le),
            FilterExpr::Gt { field, value } => Self::ordered(row, field, value, Ordering::is_gt),
            FilterExpr::Ge { field, value } => Self::ordered(row, field, value, Ordering::is_ge),
            FilterExpr::In { field, values } => match Self::get(row, field) {
                Some(fv) => values.iter().any(|v| Self::values_equal(fv, v)),
                None => false,
            },
            FilterExpr::NotIn { field, values } => match Self::get(row, field) {
                Some(fv) => !values.iter().any(|v| Self::values_equal(fv, v)),
                None => true,
            },
            FilterExpr::IsNull { field } => Self::get(row, field).is_none(),
            FilterExpr::IsNotNull { field } => Self::get(row, field).is_some(),
            FilterExpr::Like { field, pattern } => match Self::get(row, field) {
                Some(Value::String(s)) => Self::like_match(s, pattern),
                _ => false,
            },
            FilterExpr::And(filters) => filters.iter().all(|f| Self::evaluate_simple(f, row)),
            FilterExpr::Or(filters) => filters.iter().any(|f| Self::evaluate_simple(f, row)),
        }
    }

    /// Evaluate every filter; an empty list passes.
    pub fn evaluate_all(filters: &[FilterExpr], row: &Row) -> bool {
        filters.iter().all(|f| Self::evaluate(f, row))
    }

    fn evaluate_simple(filter: &SimpleFilter, row: &Row) -> bool {
        match filter {
            SimpleFilter::Eq { field, value } => {
                Self::compare_field(row, field, value, Self::values_equal)
            }
            SimpleFilter::Ne { field, value } => {
                Self::compare_field(row, field, value, |a, b| !Self::values_equal(a, b))
            }
            SimpleFilter::Lt { field, value } => Self::ordered(row, field, value, Ordering::is_lt),
            SimpleFilter::Gt { field, value } => Self::ordered(row, field, value, Ordering::is_gt),
            SimpleFilter::IsNull { field } => Self::get(row, field).is_none(),
            SimpleFilter::IsNotNull { field } => Self::get(row, field).is_some(),
            SimpleFilter::Like { field, pattern } => match Self::get(row, field) {
                Some(Value::String(s)) => Self::like_match(s, pattern),
                _ => false,
            },
        }
    }

    /// Get a non-null property value.
    fn get<'a>(row: &'a Row, field: &str) -> Option<&'a Value> {
        row.get(field).filter(|v| !v.is_null())
    }

    fn compare_field<F>(row: &Row, field: &str, value: &Value, comparator: F) -> bool
    where
        F: FnOnce(&Value, &Value) -> bool,
    {
        match Self::get(row, field) {
            Some(fv) => comparator(fv, value),
            None => false,
        }
    }

    fn ordered(row: &Row, field: &str, value: &Value, test: fn(Ordering) -> bool) -> bool {
        Self::compare_field(row, field, value, |a, b| {
            Self::compare_values(a, b).map(test).unwrap_or(false)
        })
    }

    /// Check if two values are equal, comparing integers and floats
    /// numerically.
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Int64(a), Value::Float64(b)) => (*a as f64) == *b,
            (Value::Float64(a), Value::Int64(b)) => *a == (*b as f64),
            _ => a == b,
        }
    }

    /// Compare two values, returning their ordering if comparable.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// `%` matches any run of characters, `_` exactly one, and a backslash
    /// escapes the next pattern character.
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let value: Vec<char> = value.chars().collect();
        let pattern: Vec<char> = pattern.chars().collect();
        Self::like_at(&value, &pattern)
    }

    fn like_at(value: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => value.is_empty(),
            Some(('%', rest)) => (0..=value.len()).any(|skip| Self::like_at(&value[skip..], rest)),
            Some(('_', rest)) => !value.is_empty() && Self::like_at(&value[1..], rest),
            Some(('\\', rest)) => match (rest.split_first(), value.split_first()) {
                (Some((p, rest)), Some((c, tail))) if p == c => Self::like_at(tail, rest),
                _ => false,
            },
            Some((p, rest)) => match value.split_first() {
                Some((c, tail)) if c == p => Self::like_at(tail, rest),
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_row(fields: Vec<(&str, Value)>) -> Row {
        fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect()
    }

    #[test]
    fn test_eq_filter() {
        let row = make_row(vec![("Prop", Value::Int64(123)), ("Name", "a1".into())]);

        assert!(FilterEvaluator::evaluate(&FilterExpr::eq("Prop", 123), &row));
        assert!(!FilterEvaluator::evaluate(&FilterExpr::eq("Prop", 456), &row));
        assert!(FilterEvaluator::evaluate(&FilterExpr::eq("Prop", 123.0), &row));
        assert!(!FilterEvaluator::evaluate(&FilterExpr::eq("Missing", 1), &row));
    }

    #[test]
    fn test_comparison_filters() {
        let row = make_row(vec![("score", Value::Int64(75))]);

        assert!(FilterEvaluator::evaluate(&FilterExpr::gt("score", 50), &row));
        assert!(!FilterEvaluator::evaluate(&FilterExpr::lt("score", 50), &row));
        assert!(FilterEvaluator::evaluate(
            &FilterExpr::Le {
                field: "score".into(),
                value: Value::Int64(75)
            },
            &row
        ));
    }

    #[test]
    fn test_null_filters() {
        let row = make_row(vec![("a", Value::Null), ("b", Value::Int64(1))]);

        assert!(FilterEvaluator::evaluate(&FilterExpr::IsNull { field: "a".into() }, &row));
        assert!(FilterEvaluator::evaluate(&FilterExpr::IsNull { field: "c".into() }, &row));
        assert!(FilterEvaluator::evaluate(&FilterExpr::is_not_null("b"), &row));
        assert!(FilterEvaluator::evaluate(
            &FilterExpr::NotIn {
                field: "a".into(),
                values: vec![Value::Int64(1)]
            },
            &row
        ));
    }

    #[test]
    fn test_compound_filters() {
        let row = make_row(vec![("kind", "leaf".into()), ("size", Value::Int64(3))]);

        let and = FilterExpr::and(vec![
            SimpleFilter::eq("kind", "leaf"),
            SimpleFilter::ne("size", 4),
        ]);
        assert!(FilterEvaluator::evaluate(&and, &row));

        let or = FilterExpr::or(vec![SimpleFilter::eq("kind", "root"), SimpleFilter::is_null("x")]);
        assert!(FilterEvaluator::evaluate(&or, &row));

        assert!(FilterEvaluator::evaluate_all(&[], &row));
        assert!(!FilterEvaluator::evaluate_all(&[and, FilterExpr::eq("size", 9)], &row));
    }

    #[test]
    fn test_like_match() {
        assert!(FilterEvaluator::like_match("Aspect1", "Asp%"));
        assert!(FilterEvaluator::like_match("Aspect1", "%ect_"));
        assert!(FilterEvaluator::like_match("100%", "100\\%"));
        assert!(!FilterEvaluator::like_match("1000", "100\\%"));
        assert!(!FilterEvaluator::like_match("abc", "a_"));
        assert!(FilterEvaluator::like_match("", "%"));
    }

    #[test]
    fn test_extract_filter_fields() {
        let filter = FilterExpr::and(vec![SimpleFilter::eq("a", 1), SimpleFilter::is_null("b")]);
        let fields = extract_filter_fields(&filter);
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
