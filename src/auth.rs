//! Bearer token authentication.
//!
//! Tokens come from `auth.tokens` in the config (principal -> token) plus an
//! optional `REUNIFY_AUTH_TOKEN` override bound to the `operator` principal.
//! The matched principal is recorded as `created_by` on new reports.

use crate::config::AuthConfig;

pub const AUTH_TOKEN_ENV: &str = "REUNIFY_AUTH_TOKEN";
pub const ENV_PRINCIPAL: &str = "operator";

/// Maps a bearer token to the principal it belongs to.
pub trait IdentityProvider: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<String>;
}

/// Fixed token table.
pub struct StaticTokens {
    tokens: Vec<(String, String)>,
}

impl StaticTokens {
    pub fn new(tokens: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .filter(|(_, token)| !token.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        let mut tokens: Vec<(String, String)> = config
            .tokens
            .iter()
            .map(|(principal, token)| (principal.clone(), token.clone()))
            .collect();

        if let Ok(token) = std::env::var(AUTH_TOKEN_ENV) {
            let token = token.trim().to_string();
            if !token.is_empty() {
                tokens.push((ENV_PRINCIPAL.to_string(), token));
            }
        }

        if tokens.is_empty() {
            log::warn!("No API tokens configured; every /api request will be rejected");
        }

        Self::new(tokens)
    }
}

impl IdentityProvider for StaticTokens {
    fn authenticate(&self, token: &str) -> Option<String> {
        // check every entry so the time taken does not depend on which one matches
        let mut principal = None;
        for (name, expected) in &self.tokens {
            if validate_token(token, expected) && principal.is_none() {
                principal = Some(name.clone());
            }
        }
        principal
    }
}

/// Validates a provided token against the expected token using constant-time comparison.
///
/// Returns `false` if either token is empty.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    // XOR accumulator: if any byte differs, result will be non-zero
    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Extracts the bearer token from an Authorization header value.
///
/// Expected format: "Bearer <token>", prefix matched case-insensitively.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let prefix = header.get(..7)?;
    if !prefix.eq_ignore_ascii_case("Bearer ") {
        return None;
    }

    let token = header[7..].trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
