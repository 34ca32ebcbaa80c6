//! Attribute values and the kinds they are checked against.

use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{
    de::{self, SeqAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

/// The primitive kinds an attribute definition may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// `true` / `false`.
    Boolean,
    /// A point in time.
    Date,
    /// A floating point number.
    Float,
    /// A signed integer.
    Integer,
    /// Free text.
    String,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::Float => "Float",
            Self::Integer => "Integer",
            Self::String => "String",
        };
        f.write_str(name)
    }
}

/// The kind of an attribute definition.
///
/// In a snapshot this is written as `type: <Primitive>` or, for enumerations,
/// as `type: Enum` together with `enum_type` and optionally `multi_valued`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AttributeKind {
    /// See [`PrimitiveKind::Boolean`].
    Boolean,
    /// See [`PrimitiveKind::Date`].
    Date,
    /// See [`PrimitiveKind::Float`].
    Float,
    /// See [`PrimitiveKind::Integer`].
    Integer,
    /// See [`PrimitiveKind::String`].
    String,
    /// A selection out of the values of an enumeration type.
    Enum {
        /// Identifier of the enumeration type providing the options.
        enum_type: String,
        /// Whether more than one value may be selected.
        #[serde(default)]
        multi_valued: bool,
    },
}

impl AttributeKind {
    /// Returns the primitive kind, or `None` for enumerations.
    #[must_use]
    pub const fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            Self::Boolean => Some(PrimitiveKind::Boolean),
            Self::Date => Some(PrimitiveKind::Date),
            Self::Float => Some(PrimitiveKind::Float),
            Self::Integer => Some(PrimitiveKind::Integer),
            Self::String => Some(PrimitiveKind::String),
            Self::Enum { .. } => None,
        }
    }
}

impl AttributeKind {
    /// Splits the kind into its primitive or enumeration form.
    #[must_use]
    pub fn classify(&self) -> KindClass<'_> {
        match self {
            Self::Enum {
                enum_type,
                multi_valued,
            } => KindClass::Enum {
                enum_type,
                multi_valued: *multi_valued,
            },
            Self::Boolean => KindClass::Primitive(PrimitiveKind::Boolean),
            Self::Date => KindClass::Primitive(PrimitiveKind::Date),
            Self::Float => KindClass::Primitive(PrimitiveKind::Float),
            Self::Integer => KindClass::Primitive(PrimitiveKind::Integer),
            Self::String => KindClass::Primitive(PrimitiveKind::String),
        }
    }
}

/// A borrowed, two-way view of an [`AttributeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClass<'a> {
    /// A primitive kind.
    Primitive(PrimitiveKind),
    /// An enumeration kind.
    Enum {
        /// Identifier of the enumeration type.
        enum_type: &'a str,
        /// Whether more than one value may be selected.
        multi_valued: bool,
    },
}

impl From<PrimitiveKind> for AttributeKind {
    fn from(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Boolean => Self::Boolean,
            PrimitiveKind::Date => Self::Date,
            PrimitiveKind::Float => Self::Float,
            PrimitiveKind::Integer => Self::Integer,
            PrimitiveKind::String => Self::String,
        }
    }
}

/// An attribute value.
///
/// Snapshot values are loosely typed; they are normalised into this closed
/// set of variants when the snapshot is loaded so that type checking is a
/// comparison of variant tags.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(String),
    /// A timestamp, normalised to UTC.
    Date(DateTime<Utc>),
    /// Identifiers of selected enumeration values.
    EnumRefs(Vec<String>),
}

impl Value {
    /// The primitive kind of this value, or `None` for enumeration values.
    #[must_use]
    pub const fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            Self::Bool(_) => Some(PrimitiveKind::Boolean),
            Self::Int(_) => Some(PrimitiveKind::Integer),
            Self::Float(_) => Some(PrimitiveKind::Float),
            Self::Str(_) => Some(PrimitiveKind::String),
            Self::Date(_) => Some(PrimitiveKind::Date),
            Self::EnumRefs(_) => None,
        }
    }

    /// A short name for the variant, used in diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "Boolean",
            Self::Int(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Str(_) => "String",
            Self::Date(_) => "Date",
            Self::EnumRefs(_) => "Enum",
        }
    }

    /// Compare two values the way the reconciler does.
    ///
    /// Enumeration selections are compared as sets when `multi_valued` is
    /// set, and exactly otherwise. Floats are compared by their total order,
    /// so `NaN` matches itself. Every other variant uses plain equality.
    #[must_use]
    pub fn matches(&self, other: &Self, multi_valued: bool) -> bool {
        match (self, other) {
            (Self::EnumRefs(a), Self::EnumRefs(b)) if multi_valued => {
                a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
            }
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::EnumRefs(values) => write!(f, "[{}]", values.join(", ")),
        }
    }
}

/// Parse the timestamp formats RM exports are known to produce.
///
/// Accepts RFC 3339 as well as the space separated
/// `YYYY-MM-DD HH:MM:SS[.f]+HH:MM` form.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Date(d) => serializer.serialize_str(&d.to_rfc3339()),
            Self::EnumRefs(values) => values.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a boolean, number, string, timestamp or list of enumeration values")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {v} is out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(parse_timestamp(v).map_or_else(|| Value::Str(v.to_owned()), Value::Date))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(parse_timestamp(&v).map_or(Value::Str(v), Value::Date))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
        while let Some(value) = seq.next_element::<EnumRef>()? {
            values.push(value.0);
        }
        Ok(Value::EnumRefs(values))
    }
}

/// Enumeration value ids may be exported as numbers; keep them as strings.
struct EnumRef(String);

impl<'de> Deserialize<'de> for EnumRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(i) => Self(i.to_string()),
            Raw::Str(s) => Self(s),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    #[test_case("true", &Value::Bool(true); "boolean")]
    #[test_case("7", &Value::Int(7); "integer")]
    #[test_case("1.5", &Value::Float(1.5); "float")]
    #[test_case("hello", &Value::Str("hello".into()); "string")]
    #[test_case("[a, b]", &Value::EnumRefs(vec!["a".into(), "b".into()]); "enum refs")]
    fn deserializes_yaml_scalars(yaml: &str, expected: &Value) {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(&value, expected);
    }

    #[test_case("2022-06-30T15:07:18.664+00:00"; "rfc3339")]
    #[test_case("2022-06-30 15:07:18.664000+00:00"; "space separated")]
    fn deserializes_timestamps(yaml: &str) {
        let value: Value = serde_yaml::from_str(&format!("'{yaml}'")).unwrap();
        let expected = Utc.with_ymd_and_hms(2022, 6, 30, 15, 7, 18).unwrap()
            + chrono::Duration::milliseconds(664);
        assert_eq!(value, Value::Date(expected));
    }

    #[test]
    fn multi_valued_enums_compare_as_sets() {
        let ab = Value::EnumRefs(vec!["a".into(), "b".into()]);
        let ba = Value::EnumRefs(vec!["b".into(), "a".into()]);
        assert!(ab.matches(&ba, true));
        assert!(!ab.matches(&ba, false));
    }

    #[test]
    fn nan_matches_itself() {
        let nan: Value = serde_yaml::from_str(".nan").unwrap();
        assert!(nan.matches(&nan.clone(), false));
        assert!(!nan.matches(&Value::Float(1.0), false));
        assert!(Value::Float(0.5).matches(&Value::Float(0.5), false));
    }

    #[test]
    fn date_round_trips_through_serialization() {
        let date = Value::Date(Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap());
        let yaml = serde_yaml::to_string(&date).unwrap();
        let back: Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, date);
    }

    #[test]
    fn attribute_kind_parses_enum_form() {
        let kind: AttributeKind =
            serde_yaml::from_str("type: Enum\nenum_type: severity\nmulti_valued: true").unwrap();
        assert_eq!(
            kind,
            AttributeKind::Enum {
                enum_type: "severity".into(),
                multi_valued: true
            }
        );
        let kind: AttributeKind = serde_yaml::from_str("type: Date").unwrap();
        assert_eq!(kind.primitive(), Some(PrimitiveKind::Date));
    }
}
