// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serde helpers shared across the `agent://` protocol core.
//!
//! Consolidates the millisecond-`Duration` and epoch-second-`SystemTime`
//! encodings that would otherwise be duplicated as private modules inside
//! each of `agent-transport`, `agent-resolver`, and `agent-config`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Serde helpers for `Duration` represented as a millisecond integer (`u64`).
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize `Duration` to integer milliseconds.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Deserialize `Duration` from integer milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde helpers for `Option<Duration>` represented as optional millisecond
/// integers.
pub mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize `Option<Duration>` to optional integer milliseconds.
    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize `Option<Duration>` from optional integer milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

/// Serde helpers for `SystemTime` represented as integer seconds since the
/// Unix epoch — used for the resolver cache's `stored_at_epoch` /
/// `expires_at_epoch` fields (§6).
pub mod epoch_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    /// Serialize `SystemTime` to integer seconds since the epoch.
    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        serializer.serialize_u64(secs)
    }

    /// Deserialize `SystemTime` from integer seconds since the epoch.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// Serde helpers for `Option<SystemTime>` represented as optional integer
/// seconds since the epoch.
pub mod option_epoch_seconds {
    use super::epoch_seconds;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::SystemTime;

    /// Serialize `Option<SystemTime>` to optional epoch seconds.
    pub fn serialize<S: Serializer>(
        time: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wrap(#[serde(with = "epoch_seconds")] SystemTime);
        time.map(Wrap).serialize(serializer)
    }

    /// Deserialize `Option<SystemTime>` from optional epoch seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SystemTime>, D::Error> {
        #[derive(Deserialize)]
        struct Wrap(#[serde(with = "epoch_seconds")] SystemTime);
        Ok(Option::<Wrap>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct WithDuration {
        #[serde(with = "crate::duration_millis")]
        value: Duration,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct WithOptionalDuration {
        #[serde(with = "crate::option_duration_millis")]
        value: Option<Duration>,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct WithEpoch {
        #[serde(with = "crate::epoch_seconds")]
        value: SystemTime,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct WithOptionalEpoch {
        #[serde(with = "crate::option_epoch_seconds")]
        value: Option<SystemTime>,
    }

    #[test]
    fn duration_roundtrip_as_millis() {
        let input = WithDuration {
            value: Duration::from_millis(250),
        };
        let json = serde_json::to_string(&input).expect("serialize");
        assert_eq!(json, r#"{"value":250}"#);
        let output: WithDuration = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(output, input);
    }

    #[test]
    fn option_duration_roundtrip_some_and_none() {
        let some = WithOptionalDuration {
            value: Some(Duration::from_millis(42)),
        };
        let some_json = serde_json::to_string(&some).expect("serialize some");
        assert_eq!(some_json, r#"{"value":42}"#);
        assert_eq!(
            serde_json::from_str::<WithOptionalDuration>(&some_json).unwrap(),
            some
        );

        let none = WithOptionalDuration { value: None };
        let none_json = serde_json::to_string(&none).expect("serialize none");
        assert_eq!(none_json, r#"{"value":null}"#);
        assert_eq!(
            serde_json::from_str::<WithOptionalDuration>(&none_json).unwrap(),
            none
        );
    }

    #[test]
    fn epoch_seconds_roundtrip() {
        let input = WithEpoch {
            value: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        };
        let json = serde_json::to_string(&input).unwrap();
        assert_eq!(json, r#"{"value":1700000000}"#);
        let output: WithEpoch = serde_json::from_str(&json).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn epoch_seconds_pre_unix_epoch_saturates_to_zero() {
        let input = WithEpoch {
            value: UNIX_EPOCH - Duration::from_secs(10),
        };
        let json = serde_json::to_string(&input).unwrap();
        assert_eq!(json, r#"{"value":0}"#);
    }

    #[test]
    fn option_epoch_seconds_roundtrip_some_and_none() {
        let some = WithOptionalEpoch {
            value: Some(UNIX_EPOCH + Duration::from_secs(5)),
        };
        let json = serde_json::to_string(&some).unwrap();
        assert_eq!(json, r#"{"value":5}"#);
        assert_eq!(
            serde_json::from_str::<WithOptionalEpoch>(&json).unwrap(),
            some
        );

        let none = WithOptionalEpoch { value: None };
        let json = serde_json::to_string(&none).unwrap();
        assert_eq!(json, r#"{"value":null}"#);
        assert_eq!(
            serde_json::from_str::<WithOptionalEpoch>(&json).unwrap(),
            none
        );
    }
}
