//! Numeric coercion of runtime values.

use crate::pipeline::{DataSourceKind, Number};
use crate::poller::PollError;
use crate::protocol::Value;

/// Convert a runtime value into a numeric cell of the declared kind.
///
/// Text parses as float for gauges and as integer otherwise; text that does
/// not parse yields `None`. Numeric primitives are widened, exact numbers
/// pass through untouched. `Null` yields `None` (an empty table cell).
///
/// # Errors
/// Returns [`PollError::Coercion`] for every other value kind.
pub fn coerce(value: &Value, kind: DataSourceKind) -> Result<Option<Number>, PollError> {
    let number = match value {
        Value::Null => return Ok(None),
        Value::String(text) => return Ok(parse_text(text, kind)),
        Value::Byte(v) => Number::Integer(i64::from(*v)),
        Value::Short(v) => Number::Integer(i64::from(*v)),
        Value::Int(v) => Number::Integer(i64::from(*v)),
        Value::Long(v) => Number::Integer(*v),
        Value::Float(v) => Number::Float(f64::from(*v)),
        Value::Double(v) => Number::Float(*v),
        Value::BigInteger(v) | Value::BigDecimal(v) => Number::Exact(v.clone()),
        other => return Err(PollError::Coercion(other.type_name().to_string())),
    };
    Ok(Some(number))
}

fn parse_text(text: &str, kind: DataSourceKind) -> Option<Number> {
    if kind.is_gauge() {
        text.parse().ok().map(Number::Float)
    } else {
        text.parse().ok().map(Number::Integer)
    }
}

/// Coerce one value per data source, in declared order.
///
/// The first coercion error aborts the whole row.
pub fn coerce_row<'a>(
    values: impl IntoIterator<Item = &'a Value>,
    kinds: &[DataSourceKind],
) -> Result<Vec<Option<Number>>, PollError> {
    values
        .into_iter()
        .zip(kinds)
        .map(|(value, kind)| coerce(value, *kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CompositeValue, ObjectValue};

    #[test]
    fn test_text_parses_per_kind() {
        assert_eq!(
            coerce(&Value::from("2.75"), DataSourceKind::Gauge).unwrap(),
            Some(Number::Float(2.75))
        );
        assert_eq!(
            coerce(&Value::from("42"), DataSourceKind::Counter).unwrap(),
            Some(Number::Integer(42))
        );
        // Counter kinds never parse a fraction.
        assert_eq!(coerce(&Value::from("2.75"), DataSourceKind::Derive).unwrap(), None);
    }

    #[test]
    fn test_unparsable_text_is_none() {
        for kind in [
            DataSourceKind::Gauge,
            DataSourceKind::Counter,
            DataSourceKind::Derive,
            DataSourceKind::Absolute,
        ] {
            assert_eq!(coerce(&Value::from("abc"), kind).unwrap(), None);
        }
    }

    #[test]
    fn test_primitives_widen() {
        let gauge = DataSourceKind::Gauge;
        assert_eq!(coerce(&Value::Byte(-3), gauge).unwrap(), Some(Number::Integer(-3)));
        assert_eq!(coerce(&Value::Short(300), gauge).unwrap(), Some(Number::Integer(300)));
        assert_eq!(coerce(&Value::Int(70_000), gauge).unwrap(), Some(Number::Integer(70_000)));
        assert_eq!(coerce(&Value::Long(i64::MAX), gauge).unwrap(), Some(Number::Integer(i64::MAX)));
        assert_eq!(coerce(&Value::Float(0.5), gauge).unwrap(), Some(Number::Float(0.5)));
        assert_eq!(coerce(&Value::Double(2.25), gauge).unwrap(), Some(Number::Float(2.25)));
    }

    #[test]
    fn test_exact_numbers_keep_precision() {
        let big = "123456789012345678901234567890.000000001";
        let value = Value::BigDecimal(big.parse().unwrap());
        match coerce(&value, DataSourceKind::Gauge).unwrap() {
            Some(Number::Exact(e)) => assert_eq!(e.as_str(), big),
            other => panic!("expected exact number, got {other:?}"),
        }

        let int = Value::BigInteger("99999999999999999999".parse().unwrap());
        assert!(matches!(
            coerce(&int, DataSourceKind::Counter).unwrap(),
            Some(Number::Exact(_))
        ));
    }

    #[test]
    fn test_null_is_empty_cell() {
        assert_eq!(coerce(&Value::Null, DataSourceKind::Gauge).unwrap(), None);
    }

    #[test]
    fn test_unsupported_kinds_fail() {
        let cases = [
            Value::Boolean(true),
            Value::Composite(CompositeValue::new("MemoryUsage")),
            Value::OpenType("SimpleType(java.lang.String)".into()),
            Value::Object(ObjectValue::new("com.example.Stats")),
        ];
        for value in cases {
            let err = coerce(&value, DataSourceKind::Gauge).unwrap_err();
            assert!(matches!(err, PollError::Coercion(_)), "{value:?}");
        }

        let err = coerce(&Value::Object(ObjectValue::new("com.example.Stats")), DataSourceKind::Gauge)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot convert type com.example.Stats to a number");
    }

    #[test]
    fn test_coerce_row_follows_declared_kinds() {
        let values = [Value::from("1.5"), Value::from("7")];
        let row = coerce_row(&values, &[DataSourceKind::Gauge, DataSourceKind::Counter]).unwrap();
        assert_eq!(row, vec![Some(Number::Float(1.5)), Some(Number::Integer(7))]);

        let bad = [Value::Long(1), Value::Boolean(false)];
        assert!(coerce_row(&bad, &[DataSourceKind::Gauge, DataSourceKind::Gauge]).is_err());
    }
}
