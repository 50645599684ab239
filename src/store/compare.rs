use std::{cmp::Ordering, fmt::Display, str::FromStr};

use serde_json::Value;

use super::error::{StoreError, StoreResult};

/// Ordering predicate used by filtered scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gte,
    Gt,
    Lte,
    Lt,
    Eq,
}

impl Operator {
    pub fn compare<T: Ord + ?Sized>(self, a: &T, b: &T) -> bool {
        let ordering = a.cmp(b);
        match self {
            Operator::Gte => ordering != Ordering::Less,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Lte => ordering != Ordering::Greater,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Eq => ordering == Ordering::Equal,
        }
    }
}

impl FromStr for Operator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">=" | "gte" => Ok(Operator::Gte),
            ">" | "gt" => Ok(Operator::Gt),
            "<=" | "lte" => Ok(Operator::Lte),
            "<" | "lt" => Ok(Operator::Lt),
            "=" | "eq" => Ok(Operator::Eq),
            other => Err(StoreError::UnsupportedOperator(other.to_string())),
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Gte => write!(f, ">="),
            Operator::Gt => write!(f, ">"),
            Operator::Lte => write!(f, "<="),
            Operator::Lt => write!(f, "<"),
            Operator::Eq => write!(f, "="),
        }
    }
}

/// Compares two values of the same kind using an operator tag such as `">="`.
pub fn compare<T: Ord + ?Sized>(a: &T, b: &T, tag: &str) -> StoreResult<bool> {
    Ok(tag.parse::<Operator>()?.compare(a, b))
}

/// A field value after coercion through an entity descriptor. Only these two kinds can be
/// compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl FieldValue {
    /// Returns `None` when the two values are of different kinds.
    pub fn matches(&self, operator: Operator, other: &FieldValue) -> Option<bool> {
        match (self, other) {
            (FieldValue::Integer(a), FieldValue::Integer(b)) => Some(operator.compare(a, b)),
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(operator.compare(a.as_str(), b.as_str())),
            _ => None,
        }
    }
}

/// `field <operator> value` filter for [super::Store::query].
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub value: Value,
    pub operator: Operator,
}

impl Predicate {
    pub fn new(field: impl Into<String>, value: impl Into<Value>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator,
        }
    }

    /// Builds a predicate from an operator tag. Unknown tags fail with
    /// [StoreError::UnsupportedOperator].
    pub fn parse(field: impl Into<String>, value: impl Into<Value>, tag: &str) -> StoreResult<Self> {
        Ok(Self::new(field, value, tag.parse()?))
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_operators_on_integers() {
        assert!(Operator::Gte.compare(&5, &5));
        assert!(!Operator::Gt.compare(&5, &5));
        assert!(Operator::Lte.compare(&4, &5));
        assert!(Operator::Lt.compare(&4, &5));
        assert!(!Operator::Lt.compare(&6, &5));
        assert!(Operator::Eq.compare(&7, &7));
        assert!(!Operator::Eq.compare(&7, &8));
    }

    #[test]
    fn test_operators_on_strings() {
        assert!(compare("abc", "abd", "<").unwrap());
        assert!(compare("b", "a", ">=").unwrap());
        assert!(compare("same", "same", "=").unwrap());
    }

    #[test]
    fn test_operator_aliases() {
        assert_eq!("gte".parse::<Operator>().unwrap(), Operator::Gte);
        assert_eq!("lt".parse::<Operator>().unwrap(), Operator::Lt);
        assert_eq!("eq".parse::<Operator>().unwrap(), Operator::Eq);
    }

    #[test]
    fn test_unsupported_operator_fails() {
        let result = compare(&1, &1, "!=");
        assert!(matches!(result, Err(StoreError::UnsupportedOperator(op)) if op == "!="));

        let result = Predicate::parse("name", json!("x"), "like");
        assert!(matches!(result, Err(StoreError::UnsupportedOperator(_))));
    }

    #[test]
    fn test_mixed_kinds_do_not_match() {
        let a = FieldValue::Integer(1);
        let b = FieldValue::Text("1".into());
        assert_eq!(a.matches(Operator::Eq, &b), None);
        assert_eq!(a.matches(Operator::Eq, &FieldValue::Integer(1)), Some(true));
    }
}
