//! Extensions for serde.

/// `Duration`をミリ秒単位の文字列としてシリアライズする。
///
/// デシリアライズ時には`"1500"`と`1500`のどちらも受け付ける。
pub mod duration_millis {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::num::ParseIntError;
    use std::time::Duration;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&to_millis(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MillisVisitor)
    }

    struct MillisVisitor;
    impl<'de> Visitor<'de> for MillisVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a non-negative number of milliseconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::custom(format!("negative duration: {}ms", v)));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            from_millis(v).map_err(E::custom)
        }
    }

    pub(crate) fn to_millis(duration: &Duration) -> String {
        (duration.as_secs() * 1000 + u64::from(duration.subsec_millis())).to_string()
    }

    pub(crate) fn from_millis(millis: &str) -> Result<Duration, ParseIntError> {
        millis.trim().parse::<u64>().map(Duration::from_millis)
    }
}
