//! Admin authorization.

use anyhow::{Result, bail};
use axum::http::{HeaderMap, header::COOKIE};

/// Header checked by [`TokenGate`].
pub const TOKEN_HEADER: &str = "x-token";
/// Cookie checked by [`TokenGate`].
pub const TOKEN_COOKIE: &str = "pwd";

/// Decides whether a request may use the admin endpoints.
pub trait AuthGate: Send + Sync {
    fn is_authorized(&self, headers: &HeaderMap) -> bool;
}

impl<F> AuthGate for F
where
    F: Fn(&HeaderMap) -> bool + Send + Sync,
{
    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        self(headers)
    }
}

/// Accepts requests presenting a shared secret, either in the `X-Token`
/// header or in the `pwd` cookie.
#[derive(Clone)]
pub struct TokenGate {
    token: String,
}

impl TokenGate {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            bail!("auth token must not be empty");
        }
        Ok(Self { token })
    }

    fn header_matches(&self, headers: &HeaderMap) -> bool {
        headers
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == self.token)
    }

    fn cookie_matches(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(name, value)| name == TOKEN_COOKIE && value == self.token)
    }
}

impl AuthGate for TokenGate {
    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        self.header_matches(headers) || self.cookie_matches(headers)
    }
}

// Keeps the secret out of debug output.
impl std::fmt::Debug for TokenGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGate").finish_non_exhaustive()
    }
}
