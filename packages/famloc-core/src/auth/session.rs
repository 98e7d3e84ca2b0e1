//! Authentication session state.

use serde::Serialize;

/// Where the authentication protocol currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    AwaitingSecondFactor,
    Authenticated,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Unauthenticated => write!(f, "unauthenticated"),
            AuthState::AwaitingSecondFactor => write!(f, "awaiting second factor"),
            AuthState::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// Tokens held by the auth client. Mutated only by the protocol.
#[derive(Default, Clone)]
pub struct AuthSession {
    bearer_token: Option<String>,
    pending_second_factor_token: Option<String>,
    second_factor_required: bool,
}

impl AuthSession {
    pub fn state(&self) -> AuthState {
        if self.second_factor_required {
            AuthState::AwaitingSecondFactor
        } else if self.bearer_token.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        }
    }

    /// The active bearer token; `None` unless authenticated.
    pub fn bearer_token(&self) -> Option<&str> {
        match self.state() {
            AuthState::Authenticated => self.bearer_token.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn pending_token(&self) -> Option<&str> {
        if self.second_factor_required {
            self.pending_second_factor_token.as_deref()
        } else {
            None
        }
    }

    pub(crate) fn authenticated(&mut self, token: String) {
        self.bearer_token = Some(token);
        self.pending_second_factor_token = None;
        self.second_factor_required = false;
    }

    pub(crate) fn await_second_factor(&mut self, pending_token: String) {
        self.bearer_token = None;
        self.pending_second_factor_token = Some(pending_token);
        self.second_factor_required = true;
    }

    /// Promote the pending token to the bearer token.
    pub(crate) fn promote_pending(&mut self) -> bool {
        match self.pending_second_factor_token.take() {
            Some(token) if self.second_factor_required => {
                self.authenticated(token);
                true
            }
            other => {
                self.pending_second_factor_token = other;
                false
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("state", &self.state())
            .field("has_bearer_token", &self.bearer_token.is_some())
            .field("has_pending_token", &self.pending_second_factor_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        let mut session = AuthSession::default();
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert_eq!(session.bearer_token(), None);

        session.await_second_factor("pending".to_string());
        assert_eq!(session.state(), AuthState::AwaitingSecondFactor);
        assert_eq!(session.bearer_token(), None);
        assert_eq!(session.pending_token(), Some("pending"));

        assert!(session.promote_pending());
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.bearer_token(), Some("pending"));
        assert_eq!(session.pending_token(), None);

        session.clear();
        assert_eq!(session.state(), AuthState::Unauthenticated);
    }

    #[test]
    fn promote_without_pending_is_refused() {
        let mut session = AuthSession::default();
        session.authenticated("tok".to_string());
        assert!(!session.promote_pending());
        assert_eq!(session.bearer_token(), Some("tok"));
    }

    #[test]
    fn debug_hides_tokens() {
        let mut session = AuthSession::default();
        session.authenticated("super-secret-token".to_string());
        assert!(!format!("{:?}", session).contains("super-secret-token"));
    }
}
