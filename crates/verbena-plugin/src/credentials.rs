use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Decrypted credential material, keyed by field name.
///
/// OAuth refresh is the store's concern; the engine only ever sees a fresh
/// token here. Values are passed into plugin invocations and discarded,
/// never cached across executions.
pub type CredentialData = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum CredentialError {
  #[error("credential '{credential_id}' not found for user '{user_id}'")]
  NotFound {
    user_id: String,
    credential_id: String,
  },

  #[error("credential store unavailable: {0}")]
  Unavailable(String),
}

/// Read-through access to stored credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
  async fn fetch(
    &self,
    user_id: &str,
    credential_id: &str,
  ) -> Result<CredentialData, CredentialError>;
}

/// In-memory credential store for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
  entries: HashMap<(String, String), CredentialData>,
}

impl InMemoryCredentialStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(
    &mut self,
    user_id: impl Into<String>,
    credential_id: impl Into<String>,
    data: CredentialData,
  ) {
    self
      .entries
      .insert((user_id.into(), credential_id.into()), data);
  }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
  async fn fetch(
    &self,
    user_id: &str,
    credential_id: &str,
  ) -> Result<CredentialData, CredentialError> {
    self
      .entries
      .get(&(user_id.to_string(), credential_id.to_string()))
      .cloned()
      .ok_or_else(|| CredentialError::NotFound {
        user_id: user_id.to_string(),
        credential_id: credential_id.to_string(),
      })
  }
}
