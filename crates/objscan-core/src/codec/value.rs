use serde::{Deserialize, Serialize};

/// A decoded field value.
///
/// Anything outside the primitive set surfaces as an opaque `Reference` so
/// callers match on variants instead of comparing type-name strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimitiveValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A list or tuple whose elements were decoded one level deep.
    List(Vec<PrimitiveValue>),
    /// An object the codec does not decode, kept as its type and address.
    Reference { type_name: String, address: u64 },
}

impl PrimitiveValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PrimitiveValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PrimitiveValue::Int(v) => Some(*v),
            PrimitiveValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PrimitiveValue::Float(v) => Some(*v),
            PrimitiveValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Scalars and lists of scalars; what a node keeps without whitelisting.
    pub fn is_plain(&self) -> bool {
        match self {
            PrimitiveValue::Reference { .. } | PrimitiveValue::List(_) => false,
            _ => true,
        }
    }
}

/// Decoding strategy selected from an object's declared type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Str,
    Unicode,
    Int,
    Long,
    Float,
    Bool,
    NoneType,
    List,
    Tuple,
    Dict,
    Other(String),
}

impl ObjectKind {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "str" => ObjectKind::Str,
            "unicode" => ObjectKind::Unicode,
            "int" => ObjectKind::Int,
            "long" => ObjectKind::Long,
            "float" => ObjectKind::Float,
            "bool" => ObjectKind::Bool,
            "NoneType" => ObjectKind::NoneType,
            "list" => ObjectKind::List,
            "tuple" => ObjectKind::Tuple,
            "dict" => ObjectKind::Dict,
            other => ObjectKind::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_type_name() {
        assert_eq!(ObjectKind::from_type_name("unicode"), ObjectKind::Unicode);
        assert_eq!(ObjectKind::from_type_name("NoneType"), ObjectKind::NoneType);
        assert_eq!(
            ObjectKind::from_type_name("Sprite"),
            ObjectKind::Other("Sprite".to_string())
        );
    }

    #[test]
    fn test_untagged_serialization() {
        let values = vec![
            PrimitiveValue::None,
            PrimitiveValue::Bool(true),
            PrimitiveValue::Int(-3),
            PrimitiveValue::Str("ok".to_string()),
            PrimitiveValue::Reference {
                type_name: "Sprite".to_string(),
                address: 4096,
            },
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(
            json,
            r#"[null,true,-3,"ok",{"type_name":"Sprite","address":4096}]"#
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(PrimitiveValue::Int(7).as_f64(), Some(7.0));
        assert_eq!(PrimitiveValue::Bool(true).as_i64(), Some(1));
        assert_eq!(PrimitiveValue::Str("x".to_string()).as_i64(), None);
        assert!(!PrimitiveValue::List(vec![]).is_plain());
        assert!(PrimitiveValue::Float(0.5).is_plain());
    }
}
