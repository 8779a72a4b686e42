//! Token authentication for realtime connections.

use std::collections::HashMap;

use async_trait::async_trait;

/// Result of checking a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Whether the token was accepted.
    pub success: bool,
    /// Principal the token authenticates as.
    pub user_id: Option<String>,
    /// Failure reason, or a short confirmation.
    pub message: String,
}

impl AuthOutcome {
    /// Token accepted for `user_id`.
    pub fn accepted(user_id: impl Into<String>) -> Self {
        Self {
            success: true,
            user_id: Some(user_id.into()),
            message: "Authenticated".into(),
        }
    }

    /// Token rejected.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            user_id: None,
            message: message.into(),
        }
    }
}

/// Checks bearer tokens presented in `auth` frames.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Validate `token`.
    async fn authenticate(&self, token: &str) -> AuthOutcome;
}

/// Accepts a fixed set of tokens, each mapped to a user ID.
pub struct StaticTokenAuthProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthProvider {
    /// Create from a token → user ID map.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Number of accepted tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are accepted.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for StaticTokenAuthProvider
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuthProvider {
    async fn authenticate(&self, token: &str) -> AuthOutcome {
        if token.is_empty() {
            return AuthOutcome::rejected("Token is required");
        }
        match self.tokens.get(token) {
            Some(user_id) => AuthOutcome::accepted(user_id.clone()),
            None => AuthOutcome::rejected("Invalid token"),
        }
    }
}
