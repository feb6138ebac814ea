use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::SqlDalError;
use crate::types::RowValues;

/// Named parameters for a command.
///
/// Names are stored without their `@`/`:` sigil and keep insertion order. Lookup is exact first,
/// then ASCII case-insensitive, so `@Name` in SQL binds a parameter inserted as `"name"`.
///
/// ```rust
/// use sql_dal::prelude::*;
///
/// let params = Params::new().with("id", 1).with("name", "alice");
/// assert_eq!(params.get("@ID"), Some(&RowValues::Int(1)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, RowValues)>,
}

fn strip_sigil(name: &str) -> &str {
    name.strip_prefix(['@', ':']).unwrap_or(name)
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<RowValues>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, name: &str, value: impl Into<RowValues>) {
        let name = strip_sigil(name);
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.entries.push((name.to_owned(), value));
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RowValues> {
        let name = strip_sigil(name);
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .or_else(|| self.entries.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)))
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Add every entry of `shared` whose name this set does not already supply.
    pub fn merge_missing(&mut self, shared: &Params) {
        for (name, value) in &shared.entries {
            if !self.contains(name) {
                self.entries.push((name.clone(), value.clone()));
            }
        }
    }

    /// Build parameters from any row-shaped serializable value (a struct or a map).
    ///
    /// Each top-level field becomes one parameter. `()` and `None` produce an empty set.
    ///
    /// # Errors
    /// Returns `SqlDalError::ParameterError` if the value does not serialize to an object.
    pub fn from_serialize<T: Serialize + ?Sized>(item: &T) -> Result<Self, SqlDalError> {
        let value = serde_json::to_value(item)
            .map_err(|e| SqlDalError::ParameterError(format!("cannot serialize parameters: {e}")))?;
        match value {
            JsonValue::Object(map) => map
                .into_iter()
                .map(|(name, v)| match RowValues::from_json(v) {
                    Ok(value) => Ok((name, value)),
                    Err(e) => Err(SqlDalError::ParameterError(format!("field {name}: {e}"))),
                })
                .collect(),
            JsonValue::Null => Ok(Params::new()),
            other => Err(SqlDalError::ParameterError(format!(
                "expected a row-shaped value (struct or map), got {other}"
            ))),
        }
    }
}

impl<K: AsRef<str>, V: Into<RowValues>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name.as_ref(), value);
        }
        params
    }
}

/// Render an item for error reports; compact JSON when possible.
pub(crate) fn describe_item<T: Serialize + ?Sized>(item: &T) -> String {
    serde_json::to_string(item).unwrap_or_else(|e| format!("<unserializable item: {e}>"))
}

/// Build a [`Params`] set inline.
///
/// ```rust
/// use sql_dal::params;
///
/// let p = params! { "id" => 7, "name" => "bob" };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::params::Params::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::params::Params::new()$(.with($name, $value))+
    };
}
