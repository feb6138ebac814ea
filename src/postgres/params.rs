use std::error::Error;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use crate::types::RowValues;

type BoxedError = Box<dyn Error + Sync + Send>;

const TIMESTAMP_FORMAT: &str = "%F %T%.f";

fn narrowing_error(value: i64, ty: &Type) -> BoxedError {
    format!("value {value} does not fit column type {ty}").into()
}

fn wrong_type(kind: &str, ty: &Type) -> BoxedError {
    format!("cannot bind {kind} to column type {ty}").into()
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME
    )
}

fn int_to_sql(i: i64, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxedError> {
    match *ty {
        Type::INT2 => i16::try_from(i)
            .map_err(|_| narrowing_error(i, ty))?
            .to_sql(ty, out),
        Type::INT4 => i32::try_from(i)
            .map_err(|_| narrowing_error(i, ty))?
            .to_sql(ty, out),
        Type::INT8 => i.to_sql(ty, out),
        #[allow(clippy::cast_precision_loss)]
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        #[allow(clippy::cast_precision_loss)]
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::BOOL => (i != 0).to_sql(ty, out),
        Type::JSON | Type::JSONB => JsonValue::from(i).to_sql(ty, out),
        _ if is_text(ty) => i.to_string().to_sql(ty, out),
        _ => Err(wrong_type("integer", ty)),
    }
}

fn float_to_sql(f: f64, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxedError> {
    match *ty {
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => (f as f32).to_sql(ty, out),
        Type::FLOAT8 => f.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 => {
            // serde hands whole numbers from f64 fields over as floats
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let whole = (f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0)
                .then_some(f as i64);
            match whole {
                Some(i) => int_to_sql(i, ty, out),
                None => Err(format!("value {f} is not a whole number for column type {ty}").into()),
            }
        }
        Type::JSON | Type::JSONB => serde_json::Number::from_f64(f)
            .ok_or_else(|| wrong_type("float", ty))
            .and_then(|n| JsonValue::Number(n).to_sql(ty, out)),
        _ if is_text(ty) => f.to_string().to_sql(ty, out),
        _ => Err(wrong_type("float", ty)),
    }
}

/// Parse text carrying a point in time, in either the bound layout or chrono's serialized forms.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    RowValues::Text(s.to_owned())
        .as_timestamp()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

fn text_to_sql(s: &str, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxedError> {
    let unparsable = || -> BoxedError { format!("text {s:?} is not a valid {ty}").into() };
    match *ty {
        Type::TIMESTAMP => parse_timestamp(s).ok_or_else(unparsable)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&Utc).to_sql(ty, out),
            Err(_) => parse_timestamp(s)
                .ok_or_else(unparsable)?
                .and_utc()
                .to_sql(ty, out),
        },
        Type::DATE => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .or_else(|| parse_timestamp(s).map(|dt| dt.date()))
            .ok_or_else(unparsable)?
            .to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<JsonValue>(s)
            .map_err(|_| unparsable())?
            .to_sql(ty, out),
        _ if is_text(ty) => s.to_sql(ty, out),
        _ => Err(wrong_type("text", ty)),
    }
}

impl ToSql for RowValues {
    fn to_sql(&self, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxedError> {
        match self {
            RowValues::Int(i) => int_to_sql(*i, ty, out),
            RowValues::Float(f) => float_to_sql(*f, ty, out),
            RowValues::Text(s) => text_to_sql(s, ty, out),
            RowValues::Bool(b) => match *ty {
                Type::BOOL => (*b).to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(i64::from(*b), ty, out),
                _ if is_text(ty) => b.to_string().to_sql(ty, out),
                _ => Err(wrong_type(self.kind(), ty)),
            },
            RowValues::Timestamp(dt) => match *ty {
                Type::TIMESTAMP => dt.to_sql(ty, out),
                Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                _ if is_text(ty) => dt.format(TIMESTAMP_FORMAT).to_string().to_sql(ty, out),
                _ => Err(wrong_type(self.kind(), ty)),
            },
            RowValues::Null => Ok(IsNull::Yes),
            RowValues::JSON(jsval) => match *ty {
                Type::JSON | Type::JSONB => jsval.to_sql(ty, out),
                _ if is_text(ty) => jsval.to_string().to_sql(ty, out),
                _ => Err(wrong_type(self.kind(), ty)),
            },
            RowValues::Blob(bytes) => match *ty {
                Type::BYTEA => bytes.to_sql(ty, out),
                _ => Err(wrong_type(self.kind(), ty)),
            },
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}

pub(crate) fn as_refs(params: &[RowValues]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_narrows_to_int4() {
        let mut buf = bytes::BytesMut::new();
        let is_null = RowValues::Int(7).to_sql(&Type::INT4, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn overflow_is_rejected() {
        let mut buf = bytes::BytesMut::new();
        assert!(
            RowValues::Int(i64::from(i16::MAX) + 1)
                .to_sql(&Type::INT2, &mut buf)
                .is_err()
        );
    }

    #[test]
    fn null_binds_as_null() {
        let mut buf = bytes::BytesMut::new();
        let is_null = RowValues::Null.to_sql(&Type::TEXT, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    fn bind(value: RowValues, ty: &Type) -> Result<Vec<u8>, BoxedError> {
        let mut buf = bytes::BytesMut::new();
        value.to_sql_checked(ty, &mut buf)?;
        Ok(buf.to_vec())
    }

    #[test]
    fn serialized_timestamp_text_binds_as_timestamp() {
        let expected = bind(
            RowValues::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, 2)
                    .and_then(|d| d.and_hms_opt(3, 4, 5))
                    .unwrap(),
            ),
            &Type::TIMESTAMP,
        )
        .unwrap();
        let from_text = bind(RowValues::Text("2024-01-02T03:04:05".into()), &Type::TIMESTAMP).unwrap();
        assert_eq!(from_text.len(), 8);
        assert_eq!(from_text, expected);

        let tz = bind(RowValues::Text("2024-01-02T03:04:05Z".into()), &Type::TIMESTAMPTZ).unwrap();
        assert_eq!(tz, expected);
        let date = bind(RowValues::Text("2024-01-02".into()), &Type::DATE).unwrap();
        assert_eq!(date.len(), 4);
    }

    #[test]
    fn unparsable_timestamp_text_is_rejected() {
        assert!(bind(RowValues::Text("yesterday".into()), &Type::TIMESTAMP).is_err());
        assert!(bind(RowValues::Text("7".into()), &Type::INT4).is_err());
    }

    #[test]
    fn whole_floats_bind_as_integers() {
        assert_eq!(
            bind(RowValues::Float(2.0), &Type::INT8).unwrap(),
            bind(RowValues::Int(2), &Type::INT8).unwrap()
        );
        assert_eq!(bind(RowValues::Float(-3.0), &Type::INT4).unwrap().len(), 4);
        assert!(bind(RowValues::Float(2.5), &Type::INT8).is_err());
        assert!(bind(RowValues::Float(f64::NAN), &Type::INT8).is_err());
    }

    #[test]
    fn numbers_bind_as_text() {
        assert_eq!(bind(RowValues::Int(7), &Type::TEXT).unwrap(), b"7".to_vec());
        assert_eq!(bind(RowValues::Float(1.5), &Type::VARCHAR).unwrap(), b"1.5".to_vec());
    }

    #[test]
    fn mismatched_variants_are_rejected() {
        assert!(bind(RowValues::Blob(vec![1]), &Type::TEXT).is_err());
        assert!(bind(RowValues::Bool(true), &Type::TIMESTAMP).is_err());
        assert!(bind(RowValues::Int(1), &Type::BYTEA).is_err());
    }

    #[test]
    fn json_text_binds_as_jsonb() {
        let out = bind(RowValues::Text(r#"{"a":1}"#.into()), &Type::JSONB).unwrap();
        assert_eq!(out[0], 1);
        assert!(bind(RowValues::Text("{not json".into()), &Type::JSONB).is_err());
    }
}
