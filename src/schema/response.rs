use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A user's answer to a prompt, question, statement or checklist.
///
/// Serialized untagged so responses travel as plain JSON scalars and arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<ResponseValue>),
}

impl ResponseValue {
    /// Numeric view of the value. Text is parsed after trimming; booleans and
    /// lists have no numeric meaning.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Integral view used by scoring. Only exact whole numbers qualify.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ResponseValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// `[min, max]` pair of numbers, as used by `in_range` conditions.
    pub fn range_bounds(&self) -> Option<(f64, f64)> {
        match self.as_list()? {
            [lo, hi] => Some((lo.as_number()?, hi.as_number()?)),
            _ => None,
        }
    }

    /// Convenience for list-of-id responses (checklists, multiselects).
    pub fn text_items(&self) -> Vec<&str> {
        self.as_list()
            .map(|items| items.iter().filter_map(ResponseValue::as_text).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for ResponseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for ResponseValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ResponseValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for ResponseValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for ResponseValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ResponseValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Current answers for one user session, keyed by prompt/question id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseMap {
    values: FxHashMap<String, ResponseValue>,
}

impl ResponseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ResponseValue> {
        self.values.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    /// Set an answer, returning the previous one.
    pub fn set(&mut self, id: impl Into<String>, value: impl Into<ResponseValue>) -> Option<ResponseValue> {
        self.values.insert(id.into(), value.into())
    }

    pub fn remove(&mut self, id: &str) -> Option<ResponseValue> {
        self.values.remove(id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResponseValue)> {
        self.values.iter()
    }

    /// Copy of the map restricted to the given ids.
    pub fn restrict<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> ResponseMap {
        let mut out = ResponseMap::new();
        for id in ids {
            if let Some(value) = self.values.get(id) {
                out.values.insert(id.to_string(), value.clone());
            }
        }
        out
    }
}

impl<K: Into<String>, V: Into<ResponseValue>> FromIterator<(K, V)> for ResponseMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = ResponseMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}
