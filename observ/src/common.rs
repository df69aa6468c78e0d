use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Field name to value mapping carried by entries, contexts and spans.
///
/// Ordered so that sinks render fields deterministically; insertion order is
/// not preserved.
pub type Fields = BTreeMap<String, Value>;

/// A typed field value.
///
/// Values are a closed set of variants rather than an opaque "any" so that a
/// sink can render every field without guessing.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// bool values
    Bool(bool),
    /// i64 values
    I64(i64),
    /// f64 values
    F64(f64),
    /// String values
    String(String),
    /// Ordered list of values, not necessarily homogeneous
    Array(Vec<Value>),
    /// Nested field map
    Map(Fields),
}

impl Value {
    /// String representation of the `Value`
    ///
    /// This will allocate iff the underlying value is not a `String`.
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Value::String(v) => Cow::Borrowed(v.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// Returns the value as `f64` when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => v.fmt(fmt),
            Value::I64(v) => v.fmt(fmt),
            Value::F64(v) => v.fmt(fmt),
            Value::String(v) => fmt.write_str(v),
            Value::Array(values) => {
                write!(fmt, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, ",")?;
                    }
                    write!(fmt, "{}", v)?;
                }
                write!(fmt, "]")
            }
            Value::Map(fields) => {
                write!(fmt, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, ",")?;
                    }
                    write!(fmt, "{}={}", k, v)?;
                }
                write!(fmt, "}}")
            }
        }
    }
}

macro_rules! from_values {
   (
        $(
            ($t:ty, $val:expr);
        )+
    ) => {
        $(
            impl From<$t> for Value {
                fn from(t: $t) -> Self {
                    $val(t)
                }
            }
        )+
    }
}

from_values!(
    (bool, Value::Bool);
    (i64, Value::I64);
    (f64, Value::F64);
    (String, Value::String);
    (Vec<Value>, Value::Array);
    (Fields, Value::Map);
);

macro_rules! from_small_ints {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Value {
                fn from(t: $t) -> Self {
                    Value::I64(t.into())
                }
            }
        )+
    }
}

from_small_ints!(i8, i16, i32, u8, u16, u32);

impl From<u64> for Value {
    /// Values above `i64::MAX` saturate.
    fn from(t: u64) -> Self {
        Value::I64(i64::try_from(t).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Value {
    /// Values above `i64::MAX` saturate.
    fn from(t: usize) -> Self {
        Value::I64(i64::try_from(t).unwrap_or(i64::MAX))
    }
}

impl From<f32> for Value {
    fn from(t: f32) -> Self {
        Value::F64(t.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<Cow<'_, str>> for Value {
    fn from(s: Cow<'_, str>) -> Self {
        Value::String(s.into_owned())
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::String(s.as_ref().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_nested_values() {
        let mut inner = Fields::new();
        inner.insert("b".into(), Value::from(2));
        inner.insert("a".into(), Value::from("x"));
        let value = Value::Array(vec![Value::Bool(true), Value::Map(inner), 1.5.into()]);

        assert_eq!(value.to_string(), "[true,{a=x,b=2},1.5]");
    }

    #[test]
    fn unsigned_conversions_saturate() {
        assert_eq!(Value::from(u64::MAX), Value::I64(i64::MAX));
        assert_eq!(Value::from(7u32), Value::I64(7));
    }

    #[test]
    fn as_str_borrows_strings_only() {
        assert!(matches!(Value::from("abc").as_str(), Cow::Borrowed("abc")));
        assert_eq!(Value::from(42).as_str(), "42");
        assert_eq!(Value::from(4.0).as_f64(), Some(4.0));
        assert_eq!(Value::from("4").as_f64(), None);
    }
}
