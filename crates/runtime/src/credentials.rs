//! API key resolution.

use crate::{Error, Result};
use std::collections::HashMap;

/// Name of the Anthropic API key, both as a secret and as an environment
/// variable.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// A source of named secrets, consulted before the environment.
pub trait SecretStore {
    fn secret(&self, name: &str) -> Option<String>;
}

impl SecretStore for HashMap<String, String> {
    fn secret(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Resolve the API key from `secrets`, falling back to the process
/// environment.
pub fn resolve_api_key(secrets: &impl SecretStore) -> Result<String> {
    resolve_api_key_with(secrets, |name| std::env::var(name).ok())
}

/// Like [`resolve_api_key`] with an explicit environment lookup.
pub fn resolve_api_key_with(
    secrets: &impl SecretStore,
    env: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    if let Some(key) = present(secrets.secret(API_KEY_VAR)) {
        tracing::debug!("using API key from secret store");
        return Ok(key.trim().to_string());
    }
    if let Some(key) = present(env(API_KEY_VAR)) {
        tracing::debug!("using API key from environment");
        return Ok(key.trim().to_string());
    }
    Err(Error::MissingApiKey)
}
