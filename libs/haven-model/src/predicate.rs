//! Model Match Predicates
//!
//! Composable matchers over a model's attribute view. Capability dispatch
//! (which devices participate in which alarm) is expressed as predicate data
//! rather than per-device-class code, so machines stay generic over models.

use crate::attributes::AttributeValue;
use crate::model::Model;
use serde::{Deserialize, Serialize};

/// Composable model matcher with AND/OR/NOT combinators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every model
    Always,
    /// Matches no model
    Never,
    /// Matches models whose address is in the given namespace
    NamespaceIs { namespace: String },
    /// Matches models that carry the attribute, regardless of value
    AttrPresent { key: String },
    /// Matches models whose attribute equals the value
    AttrEquals { key: String, value: AttributeValue },
    /// Matches models whose set-valued attribute contains the member
    SetContains { key: String, member: String },
    /// All inner predicates must match
    And { all: Vec<Predicate> },
    /// At least one inner predicate must match
    Or { any: Vec<Predicate> },
    /// Inner predicate must not match
    Not { inner: Box<Predicate> },
}

impl Predicate {
    /// Namespace matcher
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Predicate::NamespaceIs {
            namespace: namespace.into(),
        }
    }

    /// Attribute presence matcher
    pub fn attr_present(key: impl Into<String>) -> Self {
        Predicate::AttrPresent { key: key.into() }
    }

    /// Attribute equality matcher
    pub fn attr_equals(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Predicate::AttrEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Set membership matcher
    pub fn set_contains(key: impl Into<String>, member: impl Into<String>) -> Self {
        Predicate::SetContains {
            key: key.into(),
            member: member.into(),
        }
    }

    /// Conjunction combinator
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And { mut all } => {
                all.push(other);
                Predicate::And { all }
            },
            first => Predicate::And {
                all: vec![first, other],
            },
        }
    }

    /// Disjunction combinator
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or { mut any } => {
                any.push(other);
                Predicate::Or { any }
            },
            first => Predicate::Or {
                any: vec![first, other],
            },
        }
    }

    /// Negation combinator
    pub fn not(self) -> Self {
        Predicate::Not {
            inner: Box::new(self),
        }
    }

    /// Evaluate the predicate against a model
    pub fn matches(&self, model: &Model) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::NamespaceIs { namespace } => model.address().is_in(namespace),
            Predicate::AttrPresent { key } => model.attributes().contains(key),
            Predicate::AttrEquals { key, value } => {
                model.attributes().get(key).map(|v| v == value).unwrap_or(false)
            },
            Predicate::SetContains { key, member } => model
                .attributes()
                .get(key)
                .and_then(AttributeValue::as_set)
                .map(|s| s.contains(member))
                .unwrap_or(false),
            Predicate::And { all } => all.iter().all(|p| p.matches(model)),
            Predicate::Or { any } => any.iter().any(|p| p.matches(model)),
            Predicate::Not { inner } => !inner.matches(model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::attributes::AttributeMap;

    fn contact_sensor() -> Model {
        Model::new(
            Address::device("door-1"),
            AttributeMap::new()
                .with("cont:contact", "CLOSED")
                .with("base:place", "place-1"),
        )
    }

    #[test]
    fn test_attr_predicates() {
        let model = contact_sensor();
        assert!(Predicate::attr_present("cont:contact").matches(&model));
        assert!(Predicate::attr_equals("cont:contact", "CLOSED").matches(&model));
        assert!(!Predicate::attr_equals("cont:contact", "OPENED").matches(&model));
        assert!(!Predicate::attr_present("mot:motion").matches(&model));
    }

    #[test]
    fn test_combinators() {
        let model = contact_sensor();
        let pred = Predicate::namespace("DRIV")
            .and(Predicate::attr_present("cont:contact"))
            .and(Predicate::attr_equals("base:place", "place-1"));
        assert!(pred.matches(&model));

        let pred = Predicate::attr_present("mot:motion")
            .or(Predicate::attr_present("cont:contact"));
        assert!(pred.matches(&model));

        assert!(!pred.clone().not().matches(&model));
        assert!(Predicate::Never.or(Predicate::Always).matches(&model));
    }
}
