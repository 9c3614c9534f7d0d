//! The CEL-like filter contract: an expression string plus a map
//! of named, typed parameters. The engine only ever *composes* filters with
//! logical AND; it never parses or evaluates them — evaluation happens on
//! the remote, which is out of scope.

use std::collections::BTreeMap;

/// A typed parameter value carried alongside a filter expression: bytes or
/// an unsigned integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterParamValue {
    Bytes(Vec<u8>),
    UInt(u64),
}

/// Reserved parameter name for slot-lower-bound injection.
pub const PARAM_START_SLOT: &str = "start_slot";
/// Reserved parameter names for account replay.
pub const PARAM_OWNER: &str = "owner";
pub const PARAM_OWNER_BYTES: &str = "owner_bytes";
pub const PARAM_MIN_SLOT: &str = "min_slot";
pub const PARAM_MIN_UPDATED_SLOT: &str = "min_updated_slot";

/// A CEL-like expression plus its named parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub expression: String,
    pub params: BTreeMap<String, FilterParamValue>,
}

impl Filter {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: FilterParamValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Returns an always-true filter (used when a caller supplies no
    /// filter of their own).
    pub fn always() -> Self {
        Self::new("true")
    }

    fn is_trivial(&self) -> bool {
        self.expression.is_empty() || self.expression == "true"
    }

    /// Composes `self AND other` by logical AND, the way every generated
    /// filter is combined with the caller's own filter. Parameter name
    /// collisions keep the `other` (user-supplied-last) value.
    pub fn and(self, other: Filter) -> Filter {
        let expression = match (self.is_trivial(), other.is_trivial()) {
            (true, true) => "true".to_string(),
            (true, false) => other.expression.clone(),
            (false, true) => self.expression.clone(),
            (false, false) => format!("({}) && ({})", self.expression, other.expression),
        };
        let mut params = self.params;
        for (k, v) in other.params {
            params.insert(k, v);
        }
        Filter { expression, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_combines_expressions() {
        let a = Filter::new("a.slot >= uint(5)");
        let b = Filter::new("b.vote == false");
        let combined = a.and(b);
        assert_eq!(combined.expression, "(a.slot >= uint(5)) && (b.vote == false)");
    }

    #[test]
    fn and_with_trivial_user_filter_is_passthrough() {
        let generated = Filter::new("slot >= uint(5)");
        let combined = generated.clone().and(Filter::always());
        assert_eq!(combined.expression, generated.expression);
    }

    #[test]
    fn and_merges_params_preferring_later_on_collision() {
        let a = Filter::new("x").with_param("start_slot", FilterParamValue::UInt(1));
        let b = Filter::new("y").with_param("start_slot", FilterParamValue::UInt(2));
        let combined = a.and(b);
        assert_eq!(
            combined.params.get("start_slot"),
            Some(&FilterParamValue::UInt(2))
        );
    }
}
