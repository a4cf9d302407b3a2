//! Stream Metadata
//!
//! Stream metadata is stored as JSON events on the stream's metastream. The
//! latest metadata event wins. The JSON schema is fixed:
//!
//! ```json
//! {
//!   "$maxCount": 1000,
//!   "$maxAge": 86400,
//!   "$tb": 17,
//!   "$cacheControl": 120,
//!   "$tmp": true,
//!   "$acl": { "$r": "$all", "$w": ["svc-a", "svc-b"], "$d": "$admins",
//!             "$mr": "$admins", "$mw": "$admins" }
//! }
//! ```
//!
//! - `$maxAge` and `$cacheControl` are in seconds.
//! - `$tb` (truncate-before) of `-1` marks the stream soft-deleted.
//! - ACL fields accept a single role string or an array of roles.
//!
//! ## Robustness Over Strictness
//!
//! Metadata is parsed on the read path for every cache miss. A malformed
//! metadata event must not make a stream unreadable, so any parse failure
//! yields `StreamMetadata::EMPTY` rather than an error. Unknown keys are
//! ignored.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};

use crate::event_number::DELETED_STREAM;
use crate::record::LogRecordVersion;

/// Role granted to every authenticated principal.
pub const SYSTEM_ROLE_ALL: &str = "$all";

/// Role granted to administrators.
pub const SYSTEM_ROLE_ADMINS: &str = "$admins";

/// Access-control list attached to a stream. `None` fields fall through to
/// the next ACL layer (system settings, then built-in defaults).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamAcl {
    pub read: Option<Vec<String>>,
    pub write: Option<Vec<String>>,
    pub delete: Option<Vec<String>>,
    pub meta_read: Option<Vec<String>>,
    pub meta_write: Option<Vec<String>>,
}

impl StreamAcl {
    /// ACL granting `role` everything.
    fn uniform(role: &str) -> Self {
        let roles = Some(vec![role.to_string()]);
        Self {
            read: roles.clone(),
            write: roles.clone(),
            delete: roles.clone(),
            meta_read: roles.clone(),
            meta_write: roles,
        }
    }

    /// Built-in default for user streams: everything open to `$all`.
    pub fn user_default() -> Self {
        Self::uniform(SYSTEM_ROLE_ALL)
    }

    /// Built-in default for system streams: everything restricted to
    /// `$admins`.
    pub fn system_default() -> Self {
        Self::uniform(SYSTEM_ROLE_ADMINS)
    }

    fn to_json_value(&self) -> Value {
        let mut map = Map::new();
        let mut put = |key: &str, roles: &Option<Vec<String>>| {
            if let Some(roles) = roles {
                map.insert(key.to_string(), json!(roles));
            }
        };
        put("$r", &self.read);
        put("$w", &self.write);
        put("$d", &self.delete);
        put("$mr", &self.meta_read);
        put("$mw", &self.meta_write);
        Value::Object(map)
    }
}

/// Server-wide ACL overrides, set through the `$settings` stream by the
/// write path and surfaced here through the index backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemSettings {
    pub user_stream_acl: Option<StreamAcl>,
    pub system_stream_acl: Option<StreamAcl>,
}

/// The three ACL layers relevant to a stream, most specific first. Callers
/// use the per-field accessors, which resolve each field through the first
/// layer that defines it; the layers themselves are kept so access decisions
/// can report provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveAcl {
    pub stream: Option<StreamAcl>,
    pub system: StreamAcl,
    pub default: StreamAcl,
}

macro_rules! acl_accessor {
    ($name:ident, $field:ident) => {
        pub fn $name(&self) -> &[String] {
            self.stream
                .as_ref()
                .and_then(|acl| acl.$field.as_deref())
                .or(self.system.$field.as_deref())
                .or(self.default.$field.as_deref())
                .unwrap_or(&[])
        }
    };
}

impl EffectiveAcl {
    acl_accessor!(read_roles, read);
    acl_accessor!(write_roles, write);
    acl_accessor!(delete_roles, delete);
    acl_accessor!(meta_read_roles, meta_read);
    acl_accessor!(meta_write_roles, meta_write);
}

/// Retention and access settings for a stream. Immutable value type; the
/// all-`None` instance means "no settings".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamMetadata {
    /// Keep at most this many events; older ones expire.
    pub max_count: Option<i64>,

    /// Keep events at most this long; older ones expire.
    pub max_age: Option<Duration>,

    /// Events below this number expire. `DELETED_STREAM` marks the stream
    /// soft-deleted.
    pub truncate_before: Option<i64>,

    /// How long readers may serve this metadata from cache.
    pub cache_control: Option<Duration>,

    pub acl: Option<StreamAcl>,

    /// The stream is temporary and may be scavenged wholesale.
    pub temp_stream: Option<bool>,
}

impl StreamMetadata {
    pub const EMPTY: StreamMetadata = StreamMetadata {
        max_count: None,
        max_age: None,
        truncate_before: None,
        cache_control: None,
        acl: None,
        temp_stream: None,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Parse metadata from an event payload written with `record_version`.
    ///
    /// Never fails: malformed JSON yields `EMPTY`. Legacy V0 records encoded
    /// soft-delete as `$tb == i32::MAX`, which is remapped to the deleted
    /// marker here so old streams keep their semantics.
    pub fn from_json(data: &[u8], record_version: LogRecordVersion) -> StreamMetadata {
        let Ok(raw) = serde_json::from_slice::<RawMetadata>(data) else {
            return Self::EMPTY;
        };

        let truncate_before = match raw.truncate_before {
            Some(-1) => Some(DELETED_STREAM),
            Some(tb) if record_version == LogRecordVersion::V0 && tb == i32::MAX as i64 => {
                Some(DELETED_STREAM)
            }
            Some(tb) if tb >= 0 => Some(tb),
            _ => None,
        };

        StreamMetadata {
            max_count: raw.max_count.filter(|c| *c > 0),
            max_age: raw
                .max_age
                .filter(|secs| *secs > 0)
                .map(|secs| Duration::from_secs(secs as u64)),
            truncate_before,
            cache_control: raw
                .cache_control
                .filter(|secs| *secs > 0)
                .map(|secs| Duration::from_secs(secs as u64)),
            acl: raw.acl.map(Into::into),
            temp_stream: raw.temp_stream,
        }
    }

    /// Serialize to the metadata-event JSON payload.
    pub fn to_json(&self) -> Vec<u8> {
        let mut map = Map::new();
        if let Some(max_count) = self.max_count {
            map.insert("$maxCount".to_string(), json!(max_count));
        }
        if let Some(max_age) = self.max_age {
            map.insert("$maxAge".to_string(), json!(max_age.as_secs()));
        }
        if let Some(tb) = self.truncate_before {
            let tb = if tb == DELETED_STREAM { -1 } else { tb };
            map.insert("$tb".to_string(), json!(tb));
        }
        if let Some(cc) = self.cache_control {
            map.insert("$cacheControl".to_string(), json!(cc.as_secs()));
        }
        if let Some(tmp) = self.temp_stream {
            map.insert("$tmp".to_string(), json!(tmp));
        }
        if let Some(acl) = &self.acl {
            map.insert("$acl".to_string(), acl.to_json_value());
        }
        serde_json::to_vec(&Value::Object(map)).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(rename = "$maxCount")]
    max_count: Option<i64>,
    #[serde(rename = "$maxAge")]
    max_age: Option<i64>,
    #[serde(rename = "$tb")]
    truncate_before: Option<i64>,
    #[serde(rename = "$cacheControl")]
    cache_control: Option<i64>,
    #[serde(rename = "$acl")]
    acl: Option<RawAcl>,
    #[serde(rename = "$tmp")]
    temp_stream: Option<bool>,
}

#[derive(Deserialize)]
struct RawAcl {
    #[serde(rename = "$r", default, deserialize_with = "roles")]
    read: Option<Vec<String>>,
    #[serde(rename = "$w", default, deserialize_with = "roles")]
    write: Option<Vec<String>>,
    #[serde(rename = "$d", default, deserialize_with = "roles")]
    delete: Option<Vec<String>>,
    #[serde(rename = "$mr", default, deserialize_with = "roles")]
    meta_read: Option<Vec<String>>,
    #[serde(rename = "$mw", default, deserialize_with = "roles")]
    meta_write: Option<Vec<String>>,
}

impl From<RawAcl> for StreamAcl {
    fn from(raw: RawAcl) -> Self {
        StreamAcl {
            read: raw.read,
            write: raw.write,
            delete: raw.delete,
            meta_read: raw.meta_read,
            meta_write: raw.meta_write,
        }
    }
}

/// An ACL field is either a single role string or an array of roles.
fn roles<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
        OneOrMany::One(role) => vec![role],
        OneOrMany::Many(roles) => roles,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Parsing - retention fields
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_all_fields() {
        let json = br#"{"$maxCount":3,"$maxAge":1200,"$tb":17,"$cacheControl":120,"$tmp":true}"#;
        let meta = StreamMetadata::from_json(json, LogRecordVersion::V1);
        assert_eq!(meta.max_count, Some(3));
        assert_eq!(meta.max_age, Some(Duration::from_secs(1200)));
        assert_eq!(meta.truncate_before, Some(17));
        assert_eq!(meta.cache_control, Some(Duration::from_secs(120)));
        assert_eq!(meta.temp_stream, Some(true));
    }

    #[test]
    fn test_parse_empty_object() {
        let meta = StreamMetadata::from_json(b"{}", LogRecordVersion::V1);
        assert!(meta.is_empty());
    }

    #[test]
    fn test_parse_garbage_yields_empty() {
        for bad in [&b"not json"[..], b"", b"[1,2,3]", b"\"str\"", b"{\"$maxCount\":"] {
            let meta = StreamMetadata::from_json(bad, LogRecordVersion::V1);
            assert!(meta.is_empty(), "expected EMPTY for {:?}", bad);
        }
    }

    #[test]
    fn test_parse_unknown_keys_ignored() {
        let json = br#"{"$maxCount":5,"someFutureKey":{"a":1}}"#;
        let meta = StreamMetadata::from_json(json, LogRecordVersion::V1);
        assert_eq!(meta.max_count, Some(5));
    }

    #[test]
    fn test_parse_nonpositive_counts_dropped() {
        let meta =
            StreamMetadata::from_json(br#"{"$maxCount":0,"$maxAge":-5}"#, LogRecordVersion::V1);
        assert_eq!(meta.max_count, None);
        assert_eq!(meta.max_age, None);
    }

    // ---------------------------------------------------------------
    // Parsing - soft delete
    // ---------------------------------------------------------------

    #[test]
    fn test_tb_minus_one_is_soft_delete() {
        let meta = StreamMetadata::from_json(br#"{"$tb":-1}"#, LogRecordVersion::V1);
        assert_eq!(meta.truncate_before, Some(DELETED_STREAM));
    }

    #[test]
    fn test_v0_tb_i32_max_remaps_to_deleted() {
        let json = format!(r#"{{"$tb":{}}}"#, i32::MAX);
        let meta = StreamMetadata::from_json(json.as_bytes(), LogRecordVersion::V0);
        assert_eq!(meta.truncate_before, Some(DELETED_STREAM));
    }

    #[test]
    fn test_v1_tb_i32_max_is_literal() {
        let json = format!(r#"{{"$tb":{}}}"#, i32::MAX);
        let meta = StreamMetadata::from_json(json.as_bytes(), LogRecordVersion::V1);
        assert_eq!(meta.truncate_before, Some(i32::MAX as i64));
    }

    #[test]
    fn test_other_negative_tb_dropped() {
        let meta = StreamMetadata::from_json(br#"{"$tb":-7}"#, LogRecordVersion::V1);
        assert_eq!(meta.truncate_before, None);
    }

    // ---------------------------------------------------------------
    // Parsing - ACLs
    // ---------------------------------------------------------------

    #[test]
    fn test_acl_single_string() {
        let json = br#"{"$acl":{"$r":"$all","$w":"writer"}}"#;
        let meta = StreamMetadata::from_json(json, LogRecordVersion::V1);
        let acl = meta.acl.expect("acl parsed");
        assert_eq!(acl.read, Some(vec!["$all".to_string()]));
        assert_eq!(acl.write, Some(vec!["writer".to_string()]));
        assert_eq!(acl.delete, None);
    }

    #[test]
    fn test_acl_role_array() {
        let json = br#"{"$acl":{"$w":["svc-a","svc-b"],"$mr":"$admins"}}"#;
        let meta = StreamMetadata::from_json(json, LogRecordVersion::V1);
        let acl = meta.acl.expect("acl parsed");
        assert_eq!(
            acl.write,
            Some(vec!["svc-a".to_string(), "svc-b".to_string()])
        );
        assert_eq!(acl.meta_read, Some(vec!["$admins".to_string()]));
    }

    // ---------------------------------------------------------------
    // Round trip
    // ---------------------------------------------------------------

    #[test]
    fn test_json_round_trip() {
        let meta = StreamMetadata {
            max_count: Some(10),
            max_age: Some(Duration::from_secs(3600)),
            truncate_before: Some(4),
            cache_control: Some(Duration::from_secs(30)),
            acl: Some(StreamAcl {
                read: Some(vec!["$all".to_string()]),
                write: Some(vec!["svc".to_string()]),
                ..Default::default()
            }),
            temp_stream: Some(false),
        };
        let parsed = StreamMetadata::from_json(&meta.to_json(), LogRecordVersion::V1);
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_soft_delete_round_trip() {
        let meta = StreamMetadata {
            truncate_before: Some(DELETED_STREAM),
            ..Default::default()
        };
        let json = meta.to_json();
        assert_eq!(json, br#"{"$tb":-1}"#.to_vec());
        let parsed = StreamMetadata::from_json(&json, LogRecordVersion::V1);
        assert_eq!(parsed.truncate_before, Some(DELETED_STREAM));
    }

    // ---------------------------------------------------------------
    // Effective ACL resolution
    // ---------------------------------------------------------------

    fn effective(stream: Option<StreamAcl>) -> EffectiveAcl {
        EffectiveAcl {
            stream,
            system: StreamAcl {
                read: Some(vec!["sys-read".to_string()]),
                ..Default::default()
            },
            default: StreamAcl::user_default(),
        }
    }

    #[test]
    fn test_stream_acl_wins() {
        let acl = effective(Some(StreamAcl {
            read: Some(vec!["stream-read".to_string()]),
            ..Default::default()
        }));
        assert_eq!(acl.read_roles(), ["stream-read".to_string()]);
    }

    #[test]
    fn test_fallback_is_per_field() {
        // Stream defines only write; read falls through to the system layer,
        // delete all the way to the default layer.
        let acl = effective(Some(StreamAcl {
            write: Some(vec!["stream-write".to_string()]),
            ..Default::default()
        }));
        assert_eq!(acl.write_roles(), ["stream-write".to_string()]);
        assert_eq!(acl.read_roles(), ["sys-read".to_string()]);
        assert_eq!(acl.delete_roles(), ["$all".to_string()]);
    }

    #[test]
    fn test_no_stream_acl_falls_through() {
        let acl = effective(None);
        assert_eq!(acl.read_roles(), ["sys-read".to_string()]);
        assert_eq!(acl.meta_write_roles(), ["$all".to_string()]);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            StreamAcl::user_default().read,
            Some(vec!["$all".to_string()])
        );
        assert_eq!(
            StreamAcl::system_default().meta_write,
            Some(vec!["$admins".to_string()])
        );
    }
}
