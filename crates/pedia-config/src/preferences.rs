//! User preferences and profile, persisted under the `user-store` slot.

use std::sync::Arc;

use pedia_storage::{Storage, StorageError, read_json, slot, write_json};
use pedia_types::ResponseStyle;
use serde::{Deserialize, Serialize};

/// Measurement system used when presenting quantities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

/// How chat answers are presented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub response_style: ResponseStyle,
    pub include_evidence: bool,
    pub unit_system: UnitSystem,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            response_style: ResponseStyle::Concise,
            include_evidence: true,
            unit_system: UnitSystem::Metric,
        }
    }
}

/// Who is using the app, when they have said so.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Shape of the `user-store` slot.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedUser {
    #[serde(default)]
    preferences: Preferences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserProfile>,
}

/// Owns the preferences and the optional user profile.
///
/// Mutations are written back to the `user-store` slot; storage failures
/// are logged and the operation completes in memory.
pub struct UserStore {
    storage: Arc<dyn Storage>,
    preferences: Preferences,
    user: Option<UserProfile>,
}

impl UserStore {
    /// Create a store with default preferences and no profile.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            preferences: Preferences::default(),
            user: None,
        }
    }

    /// Create a store hydrated from the `user-store` slot.
    ///
    /// A missing, unreadable, or corrupt slot degrades to defaults.
    pub async fn load(storage: Arc<dyn Storage>) -> Self {
        let mut store = Self::new(storage);
        match read_json::<PersistedUser>(store.storage.as_ref(), slot::USER).await {
            Ok(Some(state)) => {
                store.preferences = state.preferences;
                store.user = state.user;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to load user store, using defaults: {e}");
            }
        }
        store
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    /// Replace the preferences.
    pub async fn set_preferences(&mut self, preferences: Preferences) {
        self.preferences = preferences;
        self.persist_best_effort().await;
    }

    /// Set or clear the user profile.
    pub async fn set_user(&mut self, user: Option<UserProfile>) {
        self.user = user;
        self.persist_best_effort().await;
    }

    /// Write the current state to the `user-store` slot.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let state = PersistedUser {
            preferences: self.preferences.clone(),
            user: self.user.clone(),
        };
        write_json(self.storage.as_ref(), slot::USER, &state).await
    }

    async fn persist_best_effort(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!("Failed to persist user store, continuing in memory: {e}");
        }
    }
}
