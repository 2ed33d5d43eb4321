//! Serde helpers shared by report types.

/// `f64` fields that may be `+∞`: non-finite values are written as `null`
/// and `null` reads back as `+∞`.
pub mod infinite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super::infinite_as_null")]
        value: f64,
    }

    #[test]
    fn test_infinity_is_null() {
        let json = serde_json::to_string(&Holder {
            value: f64::INFINITY,
        })
        .unwrap();
        assert_eq!(json, r#"{"value":null}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert!(back.value.is_infinite());
    }

    #[test]
    fn test_finite_passes_through() {
        let json = serde_json::to_string(&Holder { value: 2.5 }).unwrap();
        assert_eq!(json, r#"{"value":2.5}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, 2.5);
    }
}
