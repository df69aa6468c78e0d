use chrono::{LocalResult, SecondsFormat, TimeZone, Utc};
use observ::logs::{Entry, EntryKind};
use observ::{Fields, Value};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

/// Serializable view of one [`Entry`]: one JSON object per line.
#[derive(Debug, Serialize)]
pub(crate) struct LogLine<'a> {
    #[serde(serialize_with = "as_rfc3339")]
    timestamp: SystemTime,
    level: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "DataRef::is_empty")]
    data: DataRef<'a>,
}

impl<'a> From<&'a Entry> for LogLine<'a> {
    fn from(entry: &'a Entry) -> Self {
        LogLine {
            timestamp: entry.timestamp(),
            level: entry.level().as_str(),
            kind: match entry.kind() {
                EntryKind::Span => Some("span"),
                _ => None,
            },
            message: entry.message(),
            trace_id: entry.trace_id().map(|id| id.as_str()),
            span_id: entry.span_id().map(|id| id.as_str()),
            parent_id: entry.parent_id().map(|id| id.as_str()),
            request_id: entry.request_id(),
            data: DataRef(entry.data()),
        }
    }
}

#[derive(Debug)]
struct DataRef<'a>(&'a Fields);

impl DataRef<'_> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for DataRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(key, &ValueRef(value))?;
        }
        map.end()
    }
}

struct ValueRef<'a>(&'a Value);

impl Serialize for ValueRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::I64(i) => serializer.serialize_i64(*i),
            // JSON has no NaN or infinity.
            Value::F64(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::F64(_) => serializer.serialize_none(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(&ValueRef(value))?;
                }
                seq.end()
            }
            Value::Map(fields) => DataRef(fields).serialize(serializer),
            other => serializer.serialize_str(&other.as_str()),
        }
    }
}

/// RFC 3339, UTC, millisecond precision: `2024-05-01T12:00:00.123Z`.
fn as_rfc3339<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let duration_since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();

    match Utc.timestamp_opt(
        duration_since_epoch.as_secs() as i64,
        duration_since_epoch.subsec_nanos(),
    ) {
        LocalResult::Single(datetime) => {
            serializer.serialize_str(&datetime.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        _ => Err(serde::ser::Error::custom("Invalid Timestamp.")),
    }
}
