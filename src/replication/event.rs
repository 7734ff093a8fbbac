//! Replication Events
//!
//! One event per local mutation that peers must mirror. Events only carry
//! payloads that can cross a process boundary; constructors refuse the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, Element};
use crate::error::{CacheError, Result};

/// What a peer should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    Put,
    Remove,
    RemoveAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub cache_name: String,
    pub action: EventAction,
    /// Absent for REMOVE_ALL
    pub key: Option<CacheKey>,
    /// Present for PUT only
    pub element: Option<Element>,
    /// Node the mutation happened on
    pub origin: String,
    pub produced_at: DateTime<Utc>,
}

impl ReplicationEvent {
    /// PUT carrying a copy of the element.
    pub fn put(cache_name: &str, element: &Element, origin: &str) -> Result<Self> {
        if !element.is_serializable() {
            return Err(CacheError::NonSerializable(format!(
                "element for key '{}' in cache '{}'",
                element.key, cache_name
            )));
        }
        Ok(Self::build(
            cache_name,
            EventAction::Put,
            Some(element.key.clone()),
            Some(element.clone()),
            origin,
        ))
    }

    /// REMOVE of one key.
    pub fn remove(cache_name: &str, key: &CacheKey, origin: &str) -> Result<Self> {
        if !key.is_serializable() {
            return Err(CacheError::NonSerializable(format!(
                "key '{}' in cache '{}'",
                key, cache_name
            )));
        }
        Ok(Self::build(
            cache_name,
            EventAction::Remove,
            Some(key.clone()),
            None,
            origin,
        ))
    }

    /// REMOVE_ALL; never depends on element payloads.
    pub fn remove_all(cache_name: &str, origin: &str) -> Self {
        Self::build(cache_name, EventAction::RemoveAll, None, None, origin)
    }

    fn build(
        cache_name: &str,
        action: EventAction,
        key: Option<CacheKey>,
        element: Option<Element>,
        origin: &str,
    ) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            action,
            key,
            element,
            origin: origin.to_string(),
            produced_at: Utc::now(),
        }
    }

    /// Checks the key/element presence rules for the event's action.
    pub fn is_well_formed(&self) -> bool {
        match self.action {
            EventAction::Put => {
                self.key.is_some()
                    && self
                        .element
                        .as_ref()
                        .is_some_and(|e| Some(&e.key) == self.key.as_ref())
            }
            EventAction::Remove => self.key.is_some() && self.element.is_none(),
            EventAction::RemoveAll => self.key.is_none() && self.element.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheValue, LocalToken};
    use std::sync::Arc;

    #[test]
    fn test_put_event_carries_element() {
        let element = Element::new("k", "v");
        let event = ReplicationEvent::put("c", &element, "node-1").unwrap();
        assert_eq!(event.action, EventAction::Put);
        assert_eq!(event.key, Some(CacheKey::from("k")));
        assert_eq!(event.element.as_ref().unwrap().value, "v".into());
        assert_eq!(event.origin, "node-1");
        assert!(event.is_well_formed());
    }

    #[test]
    fn test_put_rejects_local_only_value() {
        let element = Element::new("k", CacheValue::LocalOnly(Arc::new(5u8)));
        assert!(matches!(
            ReplicationEvent::put("c", &element, "n"),
            Err(CacheError::NonSerializable(_))
        ));
    }

    #[test]
    fn test_remove_rejects_local_only_key() {
        let key = CacheKey::LocalOnly(LocalToken(1));
        assert!(ReplicationEvent::remove("c", &key, "n").is_err());

        let event = ReplicationEvent::remove("c", &"k".into(), "n").unwrap();
        assert!(event.element.is_none());
        assert!(event.is_well_formed());
    }

    #[test]
    fn test_remove_all_has_no_key() {
        let event = ReplicationEvent::remove_all("c", "n");
        assert!(event.key.is_none());
        assert!(event.is_well_formed());
    }

    #[test]
    fn test_event_json_uses_screaming_actions() {
        let event = ReplicationEvent::remove_all("c", "n");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"REMOVE_ALL\""));
        let decoded: ReplicationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
