use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write,
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeSet<String>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidSelector {
    #[error("operator {operator:?} on {key:?} requires at least one value")]
    MissingValues { key: String, operator: Operator },

    #[error("operator {operator:?} on {key:?} must not carry values")]
    UnexpectedValues { key: String, operator: Operator },

    #[error("selector key must not be empty")]
    EmptyKey,
}

/// A Kubernetes-style label selector.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Expressions>,
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    /// Checks that every expression is well-formed.
    pub fn validate(&self) -> Result<(), InvalidSelector> {
        for key in self.match_labels.iter().flat_map(|m| m.keys()) {
            if key.is_empty() {
                return Err(InvalidSelector::EmptyKey);
            }
        }
        for expr in self.match_expressions.iter().flatten() {
            expr.validate()?;
        }
        Ok(())
    }

    /// Tests the selector against a label set. A malformed selector matches nothing.
    pub fn matches(&self, labels: &Map) -> bool {
        if self.validate().is_err() {
            return false;
        }

        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels.iter() {
                if labels.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }

    /// Renders the selector in the query form accepted by list requests.
    pub fn to_query(&self) -> String {
        let mut terms = Vec::new();
        for (k, v) in self.match_labels.iter().flatten() {
            terms.push(format!("{k}={v}"));
        }
        for expr in self.match_expressions.iter().flatten() {
            let values = expr
                .values
                .iter()
                .flatten()
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            let mut term = String::new();
            let _ = match expr.operator {
                Operator::In => write!(term, "{} in ({values})", expr.key),
                Operator::NotIn => write!(term, "{} notin ({values})", expr.key),
                Operator::Exists => write!(term, "{}", expr.key),
                Operator::DoesNotExist => write!(term, "!{}", expr.key),
            };
            terms.push(term);
        }
        terms.join(",")
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self(Arc::new(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }
}

// === Expression ===

impl Expression {
    fn validate(&self) -> Result<(), InvalidSelector> {
        if self.key.is_empty() {
            return Err(InvalidSelector::EmptyKey);
        }
        let has_values = self.values.as_ref().is_some_and(|v| !v.is_empty());
        match self.operator {
            Operator::In | Operator::NotIn if !has_values => Err(InvalidSelector::MissingValues {
                key: self.key.clone(),
                operator: self.operator,
            }),
            Operator::Exists | Operator::DoesNotExist if has_values => {
                Err(InvalidSelector::UnexpectedValues {
                    key: self.key.clone(),
                    operator: self.operator,
                })
            }
            _ => Ok(()),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        let contains = |v: &String| self.values.as_ref().is_some_and(|vs| vs.contains(v));
        match self.operator {
            Operator::In => labels.get(&self.key).is_some_and(contains),
            Operator::NotIn => !labels.get(&self.key).is_some_and(contains),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}
