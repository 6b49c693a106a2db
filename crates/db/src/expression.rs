//! Update expressions and write conditions.

use crate::attribute::AttributeValue;

/// A `SET` update: attribute name to new value, applied in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpression {
    assignments: Vec<(String, AttributeValue)>,
}

impl UpdateExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `SET name = value`. A later assignment to the same name wins.
    pub fn set(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        let name = name.into();
        self.assignments.retain(|(existing, _)| *existing != name);
        self.assignments.push((name, value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn assignments(&self) -> &[(String, AttributeValue)] {
        &self.assignments
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.assignments.iter().map(|(name, _)| name.as_str())
    }
}

/// Precondition checked atomically with a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The stored item must already have this attribute.
    AttributeExists(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_set_keeps_the_last_value() {
        let expr = UpdateExpression::new()
            .set("stock", AttributeValue::N(1.into()))
            .set("stock", AttributeValue::N(2.into()));

        assert_eq!(expr.len(), 1);
        assert_eq!(expr.assignments()[0].1, AttributeValue::N(2.into()));
    }
}
