//! Identity types for Gantry
//!
//! TigerStyle: Explicit validation on construction, immutable after creation.

use crate::constants::*;
use crate::error::{Error, Result};
use crate::io::RngProvider;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

fn valid_chars(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Validate a standalone name component (type names, event types)
pub(crate) fn validate_name(value: &str, length_bytes_max: usize, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidIdent {
            ident: value.to_string(),
            reason: format!("{} must not be empty", what),
        });
    }

    if value.len() > length_bytes_max {
        return Err(Error::InvalidIdent {
            ident: value.to_string(),
            reason: format!(
                "{} length {} exceeds limit {}",
                what,
                value.len(),
                length_bytes_max
            ),
        });
    }

    if !valid_chars(value) {
        return Err(Error::InvalidIdent {
            ident: value.to_string(),
            reason: format!("{} contains invalid characters", what),
        });
    }

    Ok(())
}

// =============================================================================
// AgentId
// =============================================================================

/// Unique identifier for an agent instance
///
/// An agent is addressed by its type and a key within that type. The pair
/// identifies exactly one logical instance cluster-wide.
///
/// Deserialization validates, so identities arriving on the wire are
/// rejected at decode time rather than trusted.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize)]
pub struct AgentId {
    agent_type: String,
    key: String,
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            agent_type: String,
            key: String,
        }

        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.agent_type, raw.key).map_err(serde::de::Error::custom)
    }
}

impl AgentId {
    /// Create a new AgentId with validation
    ///
    /// # Errors
    /// Returns error if type or key is empty, exceeds length limits, or the
    /// type contains invalid characters.
    pub fn new(agent_type: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let agent_type = agent_type.into();
        let key = key.into();

        if agent_type.is_empty() || key.is_empty() {
            return Err(Error::InvalidIdent {
                ident: format!("{}/{}", agent_type, key),
                reason: "agent type and key must not be empty".into(),
            });
        }

        if agent_type.len() > AGENT_TYPE_LENGTH_BYTES_MAX {
            return Err(Error::InvalidIdent {
                ident: format!("{}/{}", agent_type, key),
                reason: format!(
                    "type length {} exceeds limit {}",
                    agent_type.len(),
                    AGENT_TYPE_LENGTH_BYTES_MAX
                ),
            });
        }

        if key.len() > AGENT_KEY_LENGTH_BYTES_MAX {
            return Err(Error::InvalidIdent {
                ident: format!("{}/{}", agent_type, key),
                reason: format!(
                    "key length {} exceeds limit {}",
                    key.len(),
                    AGENT_KEY_LENGTH_BYTES_MAX
                ),
            });
        }

        if !valid_chars(&agent_type) {
            return Err(Error::InvalidIdent {
                ident: format!("{}/{}", agent_type, key),
                reason: "agent type contains invalid characters".into(),
            });
        }

        Ok(Self { agent_type, key })
    }

    /// Create an AgentId without validation (for internal use only)
    ///
    /// # Safety
    /// Caller must ensure type and key are valid.
    #[doc(hidden)]
    pub fn new_unchecked(agent_type: String, key: String) -> Self {
        debug_assert!(!agent_type.is_empty());
        debug_assert!(agent_type.len() <= AGENT_TYPE_LENGTH_BYTES_MAX);
        debug_assert!(key.len() <= AGENT_KEY_LENGTH_BYTES_MAX);
        Self { agent_type, key }
    }

    /// Get the agent type
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Get the key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the full qualified name (type/key)
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.agent_type, self.key)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

// =============================================================================
// TopicId
// =============================================================================

/// Identifier for an event topic
///
/// A topic pairs a topic type with the source that emits on it. Subscriptions
/// are held per topic type; the source selects which agent key receives the
/// fan-out.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize)]
pub struct TopicId {
    topic_type: String,
    source: String,
}

impl<'de> Deserialize<'de> for TopicId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            topic_type: String,
            source: String,
        }

        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.topic_type, raw.source).map_err(serde::de::Error::custom)
    }
}

impl TopicId {
    /// Create a new TopicId with validation
    pub fn new(topic_type: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let topic_type = topic_type.into();
        let source = source.into();

        if topic_type.is_empty() || source.is_empty() {
            return Err(Error::InvalidIdent {
                ident: format!("{}/{}", topic_type, source),
                reason: "topic type and source must not be empty".into(),
            });
        }

        if topic_type.len() > TOPIC_TYPE_LENGTH_BYTES_MAX {
            return Err(Error::InvalidIdent {
                ident: format!("{}/{}", topic_type, source),
                reason: format!(
                    "type length {} exceeds limit {}",
                    topic_type.len(),
                    TOPIC_TYPE_LENGTH_BYTES_MAX
                ),
            });
        }

        if source.len() > TOPIC_SOURCE_LENGTH_BYTES_MAX {
            return Err(Error::InvalidIdent {
                ident: format!("{}/{}", topic_type, source),
                reason: format!(
                    "source length {} exceeds limit {}",
                    source.len(),
                    TOPIC_SOURCE_LENGTH_BYTES_MAX
                ),
            });
        }

        if !valid_chars(&topic_type) {
            return Err(Error::InvalidIdent {
                ident: format!("{}/{}", topic_type, source),
                reason: "topic type contains invalid characters".into(),
            });
        }

        Ok(Self { topic_type, source })
    }

    /// Get the topic type
    pub fn topic_type(&self) -> &str {
        &self.topic_type
    }

    /// Get the source
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the full qualified name (type/source)
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.topic_type, self.source)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_type, self.source)
    }
}

// =============================================================================
// WorkerId
// =============================================================================

/// Unique identifier for a worker process
///
/// Worker IDs should be stable across restarts of the same worker when
/// configured explicitly; otherwise one is generated per connection.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize)]
pub struct WorkerId(String);

impl<'de> Deserialize<'de> for WorkerId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

impl WorkerId {
    /// Create a new WorkerId with validation
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidIdent {
                ident: id.clone(),
                reason: "worker ID cannot be empty".into(),
            });
        }

        if id.len() > WORKER_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidIdent {
                ident: id.clone(),
                reason: format!(
                    "worker ID length {} exceeds limit {}",
                    id.len(),
                    WORKER_ID_LENGTH_BYTES_MAX
                ),
            });
        }

        if !valid_chars(&id) {
            return Err(Error::InvalidIdent {
                ident: id.clone(),
                reason: "worker ID contains invalid characters".into(),
            });
        }

        Ok(Self(id))
    }

    /// Create a WorkerId without validation (for internal use)
    ///
    /// # Safety
    /// Caller must ensure the ID is valid.
    #[doc(hidden)]
    pub fn new_unchecked(id: String) -> Self {
        debug_assert!(!id.is_empty());
        debug_assert!(id.len() <= WORKER_ID_LENGTH_BYTES_MAX);
        Self(id)
    }

    /// Get the worker ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generate a unique worker ID with injected RNG
    pub fn generate_with_rng(rng: &dyn RngProvider) -> Self {
        Self::new_unchecked(format!("worker-{:016x}", rng.next_u64()))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::StdRngProvider;

    #[test]
    fn test_agent_id_valid() {
        let id = AgentId::new("echo", "alice").unwrap();
        assert_eq!(id.agent_type(), "echo");
        assert_eq!(id.key(), "alice");
        assert_eq!(id.qualified_name(), "echo/alice");
        assert_eq!(format!("{}", id), "echo/alice");
    }

    #[test]
    fn test_agent_id_invalid_empty() {
        assert!(matches!(
            AgentId::new("", "alice"),
            Err(Error::InvalidIdent { .. })
        ));
        assert!(matches!(
            AgentId::new("echo", ""),
            Err(Error::InvalidIdent { .. })
        ));
    }

    #[test]
    fn test_agent_id_invalid_type_chars() {
        let result = AgentId::new("echo service", "alice");
        assert!(matches!(result, Err(Error::InvalidIdent { .. })));
    }

    #[test]
    fn test_agent_id_too_long() {
        let long = "a".repeat(AGENT_KEY_LENGTH_BYTES_MAX + 1);
        let result = AgentId::new("echo", long);
        assert!(matches!(result, Err(Error::InvalidIdent { .. })));
    }

    #[test]
    fn test_topic_id_valid() {
        let topic = TopicId::new("orders", "store-7").unwrap();
        assert_eq!(topic.topic_type(), "orders");
        assert_eq!(topic.source(), "store-7");
        assert_eq!(topic.qualified_name(), "orders/store-7");
    }

    #[test]
    fn test_topic_id_invalid() {
        assert!(TopicId::new("", "store-7").is_err());
        assert!(TopicId::new("orders!", "store-7").is_err());
    }

    #[test]
    fn test_worker_id_valid() {
        let id = WorkerId::new("worker-1").unwrap();
        assert_eq!(id.as_str(), "worker-1");
    }

    #[test]
    fn test_worker_id_invalid() {
        assert!(WorkerId::new("").is_err());
        assert!(WorkerId::new("worker/1").is_err());
        assert!(WorkerId::new("a".repeat(WORKER_ID_LENGTH_BYTES_MAX + 1)).is_err());
    }

    #[test]
    fn test_deserialize_validates_components() {
        let ok: AgentId = serde_json::from_str(r#"{"agent_type":"echo","key":"alice"}"#).unwrap();
        assert_eq!(ok.qualified_name(), "echo/alice");

        // A bad type charset is rejected at decode time.
        assert!(serde_json::from_str::<AgentId>(r#"{"agent_type":"echo bad","key":"alice"}"#)
            .is_err());

        // An over-long source never reaches the routing path.
        let long_source = "s".repeat(TOPIC_SOURCE_LENGTH_BYTES_MAX + 1);
        let json = format!(r#"{{"topic_type":"orders","source":"{}"}}"#, long_source);
        assert!(serde_json::from_str::<TopicId>(&json).is_err());

        let ok: WorkerId = serde_json::from_str(r#""worker-1""#).unwrap();
        assert_eq!(ok.as_str(), "worker-1");
        assert!(serde_json::from_str::<WorkerId>(r#""worker/1""#).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("orders", 128, "topic type").is_ok());
        assert!(validate_name("", 128, "topic type").is_err());
        assert!(validate_name("bad name", 128, "topic type").is_err());
        assert!(validate_name(&"a".repeat(129), 128, "topic type").is_err());
    }

    #[test]
    fn test_worker_id_generate() {
        let rng = StdRngProvider::with_seed(42);
        let id1 = WorkerId::generate_with_rng(&rng);
        let id2 = WorkerId::generate_with_rng(&rng);
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("worker-"));
    }
}
