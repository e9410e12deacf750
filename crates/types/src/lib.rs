use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// SQL column types supported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Char,
    Varchar,
    Text,
    Blob,
    Bool,
    Date,
    Time,
    DateTime,
}

impl DataType {
    /// True for the integral family (TINYINT through BIGINT).
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt
        )
    }

    /// True for any type ordered numerically.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, DataType::Float | DataType::Double | DataType::Decimal)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Char | DataType::Varchar | DataType::Text)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Decimal => "DECIMAL",
            DataType::Char => "CHAR",
            DataType::Varchar => "VARCHAR",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Bool => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::DateTime => "DATETIME",
        };
        f.write_str(name)
    }
}

/// A single SQL value. Comparisons follow SQL three-valued logic: any
/// comparison involving NULL yields `None`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    /// Fixed-point decimal stored as a scaled integer: the numeric value is
    /// `digits * 10^-scale`.
    Decimal {
        digits: i128,
        scale: u8,
    },
    Char(String),
    Varchar(String),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type tag of a non-null value.
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Value::Null => return None,
            Value::TinyInt(_) => DataType::TinyInt,
            Value::SmallInt(_) => DataType::SmallInt,
            Value::Int(_) => DataType::Int,
            Value::BigInt(_) => DataType::BigInt,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Decimal { .. } => DataType::Decimal,
            Value::Char(_) => DataType::Char,
            Value::Varchar(_) => DataType::Varchar,
            Value::Text(_) => DataType::Text,
            Value::Blob(_) => DataType::Blob,
            Value::Bool(_) => DataType::Bool,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::DateTime(_) => DataType::DateTime,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral value widened to i64, `None` for anything else.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Any numeric value widened to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Decimal { digits, scale } => Some(*digits as f64 / 10f64.powi(*scale as i32)),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Char(s) | Value::Varchar(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.data_type().is_some_and(|t| t.is_integer())
    }

    pub fn is_numeric(&self) -> bool {
        self.data_type().is_some_and(|t| t.is_numeric())
    }

    pub fn is_string(&self) -> bool {
        self.data_type().is_some_and(|t| t.is_string())
    }

    /// SQL comparison. NULL on either side compares as unknown (`None`);
    /// numerics compare after widening; if either side is a string the other
    /// is rendered to text and the comparison is lexicographic on UTF-8.
    /// Incomparable pairs (e.g. BLOB vs DATE) also yield `None`.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        use Value::*;

        if self.is_null() || other.is_null() {
            return None;
        }

        // Exact integral comparison, no float round-trip.
        if self.is_integer() && other.is_integer() {
            return Some(self.as_i64()?.cmp(&other.as_i64()?));
        }
        if self.is_numeric() && other.is_numeric() {
            return self.as_f64()?.partial_cmp(&other.as_f64()?);
        }
        if self.is_string() || other.is_string() {
            return Some(self.to_string().cmp(&other.to_string()));
        }

        match (self, other) {
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Blob(a), Blob(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// SQL equality under the same coercion rules as [`Value::sql_cmp`].
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        self.sql_cmp(other).map(|ord| ord == Ordering::Equal)
    }

    /// Cast a value to the declared column type. Returns `None` when the
    /// cast is lossy or nonsensical; NULL casts to NULL for every type.
    pub fn cast_to(&self, target: DataType) -> Option<Value> {
        use Value::*;

        if self.is_null() {
            return Some(Null);
        }
        if self.data_type() == Some(target) {
            return Some(self.clone());
        }

        match target {
            DataType::TinyInt => i8::try_from(self.as_i64()?).ok().map(TinyInt),
            DataType::SmallInt => i16::try_from(self.as_i64()?).ok().map(SmallInt),
            DataType::Int => i32::try_from(self.as_i64()?).ok().map(Int),
            DataType::BigInt => self.as_i64().map(BigInt),
            DataType::Float => self.as_f64().map(|v| Float(v as f32)),
            DataType::Double => self.as_f64().map(Double),
            DataType::Decimal => match self {
                Decimal { .. } => Some(self.clone()),
                _ => self.as_i64().map(|v| Decimal {
                    digits: v as i128,
                    scale: 0,
                }),
            },
            DataType::Char => self.as_str().map(|s| Char(s.to_string())),
            DataType::Varchar => self.as_str().map(|s| Varchar(s.to_string())),
            DataType::Text => self.as_str().map(|s| Text(s.to_string())),
            DataType::Blob => match self {
                Blob(b) => Some(Blob(b.clone())),
                _ => None,
            },
            DataType::Bool => self.as_bool().map(Bool),
            DataType::Date => {
                let s = self.as_str()?;
                NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Date)
            }
            DataType::Time => {
                let s = self.as_str()?;
                NaiveTime::parse_from_str(s, "%H:%M:%S").ok().map(Time)
            }
            DataType::DateTime => {
                let s = self.as_str()?;
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(DateTime)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::TinyInt(v) => write!(f, "{v}"),
            Value::SmallInt(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal { digits, scale } => {
                if *scale == 0 {
                    return write!(f, "{digits}");
                }
                let divisor = 10i128.pow(*scale as u32).unsigned_abs();
                let sign = if *digits < 0 { "-" } else { "" };
                let abs = digits.unsigned_abs();
                write!(
                    f,
                    "{sign}{}.{:0width$}",
                    abs / divisor,
                    abs % divisor,
                    width = *scale as usize
                )
            }
            Value::Char(s) | Value::Varchar(s) | Value::Text(s) => f.write_str(s),
            Value::Blob(b) => {
                f.write_str("x'")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("'")
            }
            Value::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn null_comparisons_are_unknown() {
        assert_eq!(Value::Null.sql_cmp(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Null), None);
        assert_eq!(Value::Null.sql_eq(&Value::Null), None);
    }

    #[test]
    fn integer_widths_compare_exactly() {
        assert_eq!(Value::TinyInt(5).sql_cmp(&Value::BigInt(5)), Some(Equal));
        assert_eq!(Value::SmallInt(-1).sql_cmp(&Value::Int(0)), Some(Less));
        assert_eq!(Value::BigInt(i64::MAX).sql_cmp(&Value::Int(1)), Some(Greater));
    }

    #[test]
    fn mixed_numeric_comparison_widens_to_double() {
        assert_eq!(Value::Int(2).sql_cmp(&Value::Double(2.5)), Some(Less));
        assert_eq!(Value::Float(3.0).sql_cmp(&Value::BigInt(3)), Some(Equal));
    }

    #[test]
    fn string_comparison_coerces_the_other_side() {
        assert_eq!(
            Value::Varchar("10".into()).sql_cmp(&Value::Int(10)),
            Some(Equal)
        );
        assert_eq!(
            Value::Text("abc".into()).sql_cmp(&Value::Text("abd".into())),
            Some(Less)
        );
    }

    #[test]
    fn incompatible_types_do_not_compare() {
        assert_eq!(Value::Blob(vec![1]).sql_cmp(&Value::Bool(true)), None);
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).sql_cmp(&Value::Bool(false)),
            None
        );
    }

    #[test]
    fn truthiness_is_strict() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(1).as_bool(), None);
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn decimal_display_pads_fraction() {
        let v = Value::Decimal {
            digits: -12005,
            scale: 2,
        };
        assert_eq!(v.to_string(), "-120.05");
        let whole = Value::Decimal { digits: 7, scale: 0 };
        assert_eq!(whole.to_string(), "7");
    }

    #[test]
    fn cast_rejects_out_of_range_integers() {
        assert_eq!(Value::BigInt(300).cast_to(DataType::TinyInt), None);
        assert_eq!(
            Value::BigInt(300).cast_to(DataType::SmallInt),
            Some(Value::SmallInt(300))
        );
    }

    #[test]
    fn cast_parses_date_literals() {
        let v = Value::Text("2024-02-29".into()).cast_to(DataType::Date);
        assert_eq!(
            v,
            Some(Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()))
        );
        assert_eq!(
            Value::Text("not a date".into()).cast_to(DataType::Date),
            None
        );
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::BigInt(-42),
            Value::Varchar("Ada".into()),
            Value::Bool(true),
            Value::Double(1.5),
            Value::Decimal {
                digits: 12345,
                scale: 3,
            },
            Value::Null,
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(vals, back);
    }

    proptest! {
        // Order antisymmetry over the integral family.
        #[test]
        fn order_is_antisymmetric(i in any::<i64>(), j in any::<i64>()) {
            let a = Value::BigInt(i);
            let b = Value::BigInt(j);
            match (a.sql_cmp(&b), b.sql_cmp(&a)) {
                (Some(o1), Some(o2)) => prop_assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(false, "integers must compare"),
            }
        }

        // Every non-null value equals itself.
        #[test]
        fn eq_reflexive(v in any::<i64>()) {
            prop_assert_eq!(Value::BigInt(v).sql_eq(&Value::BigInt(v)), Some(true));
        }

        // Text comparisons align with standard String ordering.
        #[test]
        fn text_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Text(a.clone());
            let vb = Value::Text(b.clone());
            prop_assert_eq!(va.sql_cmp(&vb), Some(a.cmp(&b)));
        }
    }
}
