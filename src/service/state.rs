//! Service state management.

use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::leaderboard::LeaderboardAggregator;
use crate::lifecycle::RegistrationManager;
use crate::store::RegistrationStore;

/// Shared service state.
///
/// Contains the store and the two engine components built on it.
pub struct ServiceState<S: RegistrationStore + 'static> {
    /// The registration store, kept for health checks.
    pub store: Arc<S>,
    /// Registration and referral writes.
    pub manager: Arc<RegistrationManager<S>>,
    /// Leaderboard reads.
    pub leaderboard: Arc<LeaderboardAggregator<S>>,
    config: Arc<EngineConfig>,
}

impl<S: RegistrationStore + 'static> ServiceState<S> {
    /// Create service state over a store.
    pub fn new(store: S, config: EngineConfig) -> Result<Self, ConfigError> {
        let store = Arc::new(store);
        let manager = RegistrationManager::new(Arc::clone(&store), config.clone())?;
        let leaderboard = LeaderboardAggregator::new(Arc::clone(&store), config.max_leaderboard_limit);
        Ok(Self {
            store,
            manager: Arc::new(manager),
            leaderboard: Arc::new(leaderboard),
            config: Arc::new(config),
        })
    }

    /// Create service state with configuration read from the environment.
    pub fn from_env(store: S) -> Result<Self, ConfigError> {
        Self::new(store, EngineConfig::from_env())
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<S: RegistrationStore + 'static> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            manager: Arc::clone(&self.manager),
            leaderboard: Arc::clone(&self.leaderboard),
            config: Arc::clone(&self.config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRegistrationStore;

    #[test]
    fn test_state_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.code.length = 0;
        assert!(ServiceState::new(InMemoryRegistrationStore::new(), config).is_err());
    }

    #[test]
    fn test_state_shares_store() {
        let state = ServiceState::new(InMemoryRegistrationStore::new(), EngineConfig::default()).unwrap();
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.store, &cloned.store));
        assert_eq!(cloned.config().max_leaderboard_limit, 100);
    }
}
