//! Session Factory

use std::time::Duration;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::transfer::SessionConfig;
use crate::types::SessionId;

/// Builds background session configurations with the fixed upload policy
#[derive(Clone, Debug)]
pub struct SessionFactory {
    shared_container_id: String,
    request_timeout: Duration,
    resource_timeout: Duration,
}

impl SessionFactory {
    /// Take container and timeouts from the transfer configuration
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            shared_container_id: config.shared_container_id.clone(),
            request_timeout: config.request_timeout,
            resource_timeout: config.resource_timeout,
        }
    }

    /// Fresh, globally unique session identifier
    pub fn new_session_id() -> SessionId {
        Uuid::new_v4().to_string()
    }

    /// Configuration for the session `identifier`: wakes the owning process
    /// on completion and is never deferred
    pub fn create(&self, identifier: &str) -> SessionConfig {
        SessionConfig {
            identifier: identifier.to_string(),
            shared_container_id: self.shared_container_id.clone(),
            request_timeout: self.request_timeout,
            resource_timeout: self.resource_timeout,
            sends_launch_events: true,
            discretionary: false,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_comes_from_config() {
        let config = TransferConfig {
            shared_container_id: "group.test".into(),
            request_timeout: Duration::from_secs(12),
            ..TransferConfig::default()
        };
        let session = SessionFactory::new(&config).create("abc");

        assert_eq!(session.identifier, "abc");
        assert_eq!(session.shared_container_id, "group.test");
        assert_eq!(session.request_timeout, Duration::from_secs(12));
        assert_eq!(session.resource_timeout, config.resource_timeout);
        assert!(session.sends_launch_events);
        assert!(!session.discretionary);
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionFactory::new_session_id(), SessionFactory::new_session_id());
    }
}
