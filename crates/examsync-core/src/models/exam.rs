use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel instance id for randomized sessions.
pub const RANDOM_INSTANCE: &str = "random";

/// Which exam within a subtype: a concrete numbered paper, or a randomized
/// draw that has no stable backing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExamInstance {
    Ordinal(u32),
    Random,
}

impl ExamInstance {
    pub fn is_random(&self) -> bool {
        matches!(self, ExamInstance::Random)
    }
}

impl fmt::Display for ExamInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamInstance::Ordinal(n) => write!(f, "{}", n),
            ExamInstance::Random => f.write_str(RANDOM_INSTANCE),
        }
    }
}

impl FromStr for ExamInstance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(RANDOM_INSTANCE) {
            return Ok(ExamInstance::Random);
        }
        s.parse::<u32>()
            .map(ExamInstance::Ordinal)
            .map_err(|_| format!("invalid exam instance: {:?}", s))
    }
}

impl Serialize for ExamInstance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExamInstance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Coordinates of one exam: `(domain, subtype, instance)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExamKey {
    pub domain: String,
    pub subtype: String,
    pub instance: ExamInstance,
}

impl ExamKey {
    pub fn new(domain: impl Into<String>, subtype: impl Into<String>, instance: ExamInstance) -> Self {
        Self {
            domain: domain.into(),
            subtype: subtype.into(),
            instance,
        }
    }

    pub fn random(domain: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self::new(domain, subtype, ExamInstance::Random)
    }

    pub fn is_random(&self) -> bool {
        self.instance.is_random()
    }

    /// Flat string form used as the key of persisted maps.
    pub fn composite(&self) -> String {
        format!("{}_{}_{}", self.domain, self.subtype, self.instance)
    }
}

impl fmt::Display for ExamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.subtype, self.instance)
    }
}

impl FromStr for ExamKey {
    type Err = String;

    /// Parses the `domain/subtype/instance` display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(domain), Some(subtype), Some(instance)) if !domain.is_empty() && !subtype.is_empty() => {
                Ok(ExamKey::new(domain, subtype, instance.parse()?))
            }
            _ => Err(format!("expected domain/subtype/instance, got {:?}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_parsing() {
        assert_eq!("3".parse::<ExamInstance>(), Ok(ExamInstance::Ordinal(3)));
        assert_eq!("random".parse::<ExamInstance>(), Ok(ExamInstance::Random));
        assert_eq!("RANDOM".parse::<ExamInstance>(), Ok(ExamInstance::Random));
        assert!("three".parse::<ExamInstance>().is_err());
    }

    #[test]
    fn test_instance_serializes_as_string() {
        assert_eq!(serde_json::to_string(&ExamInstance::Ordinal(3)).unwrap(), "\"3\"");
        assert_eq!(serde_json::to_string(&ExamInstance::Random).unwrap(), "\"random\"");
    }

    #[test]
    fn test_composite_key() {
        let key = ExamKey::new("nTeoria", "private", ExamInstance::Ordinal(3));
        assert_eq!(key.composite(), "nTeoria_private_3");
        assert_eq!(ExamKey::random("nTeoria", "private").composite(), "nTeoria_private_random");
    }

    #[test]
    fn test_exam_key_from_display_form() {
        let key: ExamKey = "nTeoria/private/3".parse().unwrap();
        assert_eq!(key, ExamKey::new("nTeoria", "private", ExamInstance::Ordinal(3)));
        assert_eq!(key.to_string(), "nTeoria/private/3");
        assert!("nTeoria/private".parse::<ExamKey>().is_err());
    }
}
