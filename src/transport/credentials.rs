//! Access-token lookup: OS keyring first, then environment.

use crate::{Error, Result};
use keyring::Entry;
use std::env;

/// Keyring service under which provider tokens are stored.
pub const KEYRING_SERVICE: &str = "a2ml";

/// Resolve an access token for `provider`.
///
/// 1. Keyring entry `a2ml/<provider>`
/// 2. Environment variable `env_var`
pub fn resolve_token(provider: &str, env_var: &str) -> Option<String> {
    if let Ok(entry) = Entry::new(KEYRING_SERVICE, provider) {
        if let Ok(token) = entry.get_password() {
            if !token.trim().is_empty() {
                return Some(token);
            }
        }
    }

    env::var(env_var).ok().filter(|t| !t.trim().is_empty())
}

/// Store a token in the keyring for later runs.
pub fn store_token(provider: &str, token: &str) -> Result<()> {
    Entry::new(KEYRING_SERVICE, provider)
        .and_then(|entry| entry.set_password(token))
        .map_err(|e| Error::authentication(provider, format!("cannot store token in keyring: {}", e)))
}

/// Remove a stored token. Missing entries are not an error.
pub fn delete_token(provider: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, provider)
        .map_err(|e| Error::authentication(provider, format!("cannot open keyring: {}", e)))?;
    match entry.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(Error::authentication(
            provider,
            format!("cannot remove token from keyring: {}", e),
        )),
    }
}
