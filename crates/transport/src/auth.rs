//! Session-auth implementations.

use std::sync::Mutex;

use tagstore_engine::SessionAuth;

/// Fixed session token.
///
/// Covers deployments where the cookie does not roll during a transfer;
/// the token can still be swapped externally via [`StaticAuth::set_token`],
/// which every subsequent HTTP exchange will pick up.
pub struct StaticAuth {
    token: Mutex<String>,
}

impl StaticAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(token.into()),
        }
    }

    /// Replaces the session token.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.lock().unwrap() = token.into();
    }
}

impl SessionAuth for StaticAuth {
    fn current_token(&self) -> String {
        self.token.lock().unwrap().clone()
    }

    fn token_may_have_changed(&self) {
        // Nothing to refresh for a static token.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip() {
        let auth = StaticAuth::new("webauthn=abc");
        assert_eq!(auth.current_token(), "webauthn=abc");
        auth.set_token("webauthn=def");
        assert_eq!(auth.current_token(), "webauthn=def");
        auth.token_may_have_changed();
    }
}
