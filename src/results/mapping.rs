//! Row-to-type mapping driven by serde.
//!
//! Structs (and maps) are filled by matching field names to column names, ignoring ASCII case;
//! every other target type is read from the first column. Columns the target does not name are
//! ignored, and missing `Option` fields become `None`.

use std::fmt;

use chrono::NaiveDateTime;
use serde::de::value::{SeqDeserializer, StrDeserializer};
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, IntoDeserializer, MapAccess,
    SeqAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use serde_json::Value as JsonValue;

use super::row::CustomDbRow;
use crate::error::SqlDalError;
use crate::types::RowValues;

/// Failure to fit a row into the requested type.
#[derive(Debug)]
pub struct MappingError(String);

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MappingError {}

impl de::Error for MappingError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        MappingError(msg.to_string())
    }
}

impl From<MappingError> for SqlDalError {
    fn from(err: MappingError) -> Self {
        SqlDalError::Mapping(err.0)
    }
}

/// Map one row into `T`.
///
/// ```rust
/// use std::sync::Arc;
/// use serde::Deserialize;
/// use sql_dal::prelude::*;
///
/// #[derive(Deserialize)]
/// struct User { id: i64, name: String }
///
/// let row = CustomDbRow::new(
///     Arc::new(vec!["ID".into(), "Name".into()]),
///     vec![RowValues::Int(1), RowValues::Text("ann".into())],
/// );
/// let user: User = from_row(&row)?;
/// assert_eq!(user.name, "ann");
/// let id: i64 = from_row(&row)?;
/// assert_eq!(id, 1);
/// # Ok::<(), SqlDalError>(())
/// ```
///
/// # Errors
/// Returns `SqlDalError::Mapping` if a column cannot be converted or a required field is absent.
pub fn from_row<T: DeserializeOwned>(row: &CustomDbRow) -> Result<T, SqlDalError> {
    T::deserialize(RowDeserializer { row }).map_err(SqlDalError::from)
}

fn json_error(err: serde_json::Error) -> MappingError {
    MappingError(err.to_string())
}

fn format_timestamp(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

struct RowDeserializer<'a> {
    row: &'a CustomDbRow,
}

impl<'a> RowDeserializer<'a> {
    fn first(&self) -> Result<ValueDeserializer<'a>, MappingError> {
        self.row
            .get_by_index(0)
            .map(ValueDeserializer)
            .ok_or_else(|| MappingError("row has no columns".into()))
    }
}

macro_rules! first_column {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                self.first()?.$method(visitor)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for RowDeserializer<'_> {
    type Error = MappingError;

    first_column! {
        deserialize_any deserialize_bool
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64 deserialize_i128
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64 deserialize_u128
        deserialize_f32 deserialize_f64 deserialize_char deserialize_str deserialize_string
        deserialize_bytes deserialize_byte_buf deserialize_option deserialize_unit
        deserialize_seq deserialize_identifier deserialize_ignored_any
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.first()?.deserialize_unit_struct(name, visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_seq(ColumnSeq {
            values: self.row.rows.iter(),
        })
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_map(ColumnMap {
            columns: self.row.iter(),
            value: None,
        })
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_map(FieldMap {
            row: self.row,
            fields: fields.iter(),
            value: None,
        })
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.first()?.deserialize_enum(name, variants, visitor)
    }
}

struct ColumnSeq<'a> {
    values: std::slice::Iter<'a, RowValues>,
}

impl<'de> SeqAccess<'de> for ColumnSeq<'_> {
    type Error = MappingError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Self::Error> {
        self.values
            .next()
            .map(|value| seed.deserialize(ValueDeserializer(value)))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.values.len())
    }
}

/// Every column, keyed by its own name.
struct ColumnMap<'a, I> {
    columns: I,
    value: Option<&'a RowValues>,
}

impl<'de, 'a, I> MapAccess<'de> for ColumnMap<'a, I>
where
    I: Iterator<Item = (&'a str, &'a RowValues)>,
{
    type Error = MappingError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        let Some((name, value)) = self.columns.next() else {
            return Ok(None);
        };
        self.value = Some(value);
        let key: StrDeserializer<'_, MappingError> = name.into_deserializer();
        seed.deserialize(key).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| MappingError("column value requested before its name".into()))?;
        seed.deserialize(ValueDeserializer(value))
    }
}

/// Only the fields the target declares, matched to columns ignoring case.
struct FieldMap<'a> {
    row: &'a CustomDbRow,
    fields: std::slice::Iter<'static, &'static str>,
    value: Option<&'a RowValues>,
}

impl<'de> MapAccess<'de> for FieldMap<'_> {
    type Error = MappingError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        for field in self.fields.by_ref() {
            if let Some(value) = self.row.get(field) {
                self.value = Some(value);
                let key: StrDeserializer<'static, MappingError> = (*field).into_deserializer();
                return seed.deserialize(key).map(Some);
            }
        }
        Ok(None)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| MappingError("field value requested before its name".into()))?;
        seed.deserialize(ValueDeserializer(value))
    }
}

struct ValueDeserializer<'a>(&'a RowValues);

impl ValueDeserializer<'_> {
    /// Structured view of the value: native JSON, or text that parses as JSON (`SQLite`).
    fn as_json(&self) -> Option<JsonValue> {
        match self.0 {
            RowValues::JSON(value) => Some(value.clone()),
            RowValues::Text(text) => serde_json::from_str(text).ok(),
            _ => None,
        }
    }
}

impl<'de> Deserializer<'de> for ValueDeserializer<'_> {
    type Error = MappingError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            RowValues::Int(i) => visitor.visit_i64(*i),
            RowValues::Float(f) => visitor.visit_f64(*f),
            RowValues::Text(s) => visitor.visit_str(s),
            RowValues::Bool(b) => visitor.visit_bool(*b),
            RowValues::Timestamp(dt) => visitor.visit_string(format_timestamp(dt)),
            RowValues::Null => visitor.visit_unit(),
            RowValues::JSON(value) => value.clone().deserialize_any(visitor).map_err(json_error),
            RowValues::Blob(bytes) => visitor.visit_bytes(bytes),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            RowValues::Int(i) => visitor.visit_bool(*i != 0),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(i) => visitor.visit_f64(*i as f64),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            RowValues::Int(i) => visitor.visit_string(i.to_string()),
            RowValues::Float(f) => visitor.visit_string(f.to_string()),
            RowValues::JSON(value) => visitor.visit_string(value.to_string()),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            RowValues::Text(s) => visitor.visit_bytes(s.as_bytes()),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            RowValues::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if let RowValues::Blob(bytes) = self.0 {
            let seq: SeqDeserializer<_, MappingError> = SeqDeserializer::new(bytes.iter().copied());
            return visitor.visit_seq(seq);
        }
        match self.as_json() {
            Some(value) => value.deserialize_seq(visitor).map_err(json_error),
            None => self.deserialize_any(visitor),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.as_json() {
            Some(value) => value.deserialize_map(visitor).map_err(json_error),
            None => self.deserialize_any(visitor),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.as_json() {
            Some(value) => value
                .deserialize_struct(name, fields, visitor)
                .map_err(json_error),
            None => self.deserialize_any(visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.0 {
            RowValues::Text(s) => {
                let access: StrDeserializer<'_, MappingError> = s.as_str().into_deserializer();
                visitor.visit_enum(access)
            }
            RowValues::JSON(value) => value
                .clone()
                .deserialize_enum(name, variants, visitor)
                .map_err(json_error),
            _ => self.deserialize_any(visitor),
        }
    }

    forward_to_deserialize_any! {
        i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 char unit unit_struct identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;

    use super::*;

    fn row(cols: &[&str], values: Vec<RowValues>) -> CustomDbRow {
        CustomDbRow::new(
            Arc::new(cols.iter().map(|c| (*c).to_string()).collect()),
            values,
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Account {
        id: i64,
        user_name: String,
        active: bool,
        balance: f64,
        note: Option<String>,
        tags: Vec<String>,
    }

    #[test]
    fn struct_fields_match_columns_ignoring_case() {
        let r = row(
            &["ID", "User_Name", "ACTIVE", "balance", "note", "tags", "extra"],
            vec![
                RowValues::Int(5),
                RowValues::Text("ann".into()),
                RowValues::Int(1),
                RowValues::Int(10),
                RowValues::Null,
                RowValues::Text(r#"["a","b"]"#.into()),
                RowValues::Text("ignored".into()),
            ],
        );
        let account: Account = from_row(&r).unwrap();
        assert_eq!(
            account,
            Account {
                id: 5,
                user_name: "ann".into(),
                active: true,
                balance: 10.0,
                note: None,
                tags: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn missing_optional_field_is_none_but_required_field_errors() {
        #[derive(Debug, Deserialize)]
        struct Partial {
            id: i64,
            label: Option<String>,
        }
        let r = row(&["id"], vec![RowValues::Int(1)]);
        let p: Partial = from_row(&r).unwrap();
        assert_eq!(p.id, 1);
        assert!(p.label.is_none());

        let err = from_row::<Account>(&r).unwrap_err();
        assert!(matches!(err, SqlDalError::Mapping(_)));
    }

    #[test]
    fn primitives_use_first_column() {
        let r = row(&["count", "other"], vec![RowValues::Int(42), RowValues::Int(7)]);
        assert_eq!(from_row::<i64>(&r).unwrap(), 42);
        assert_eq!(from_row::<i32>(&r).unwrap(), 42);
        assert_eq!(from_row::<String>(&r).unwrap(), "42");

        let r = row(&["n"], vec![RowValues::Null]);
        assert_eq!(from_row::<Option<i64>>(&r).unwrap(), None);
    }

    #[test]
    fn tuples_take_columns_in_order() {
        let r = row(&["a", "b"], vec![RowValues::Int(1), RowValues::Text("x".into())]);
        let (a, b): (i64, String) = from_row(&r).unwrap();
        assert_eq!((a, b), (1, "x".to_string()));
    }

    #[test]
    fn enums_from_text_and_blobs_to_bytes() {
        #[derive(Debug, Deserialize, PartialEq)]
        enum Status {
            Open,
            Closed,
        }
        let r = row(&["s"], vec![RowValues::Text("Closed".into())]);
        assert_eq!(from_row::<Status>(&r).unwrap(), Status::Closed);

        let r = row(&["b"], vec![RowValues::Blob(vec![1, 2, 3])]);
        assert_eq!(from_row::<Vec<u8>>(&r).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn timestamps_round_trip_through_chrono() {
        let dt = NaiveDateTime::parse_from_str("2024-03-04 05:06:07", "%Y-%m-%d %H:%M:%S").unwrap();
        let r = row(&["at"], vec![RowValues::Timestamp(dt)]);
        assert_eq!(from_row::<NaiveDateTime>(&r).unwrap(), dt);
    }

    #[test]
    fn empty_row_cannot_map_primitive() {
        let r = row(&[], vec![]);
        assert!(from_row::<i64>(&r).is_err());
    }
}
