// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Typed key builders for the session store.
//!
//! Every family has its own prefix so local and identity-provider tokens
//! can never collide.

/// Local refresh token -> `RefreshSession`
pub fn refresh(token: &str) -> String {
    format!("refresh:{}", token)
}

/// Email -> current local refresh token
pub fn refresh_owner(email: &str) -> String {
    format!("refresh_owner:{}", email)
}

/// IdP-backed refresh token -> `IdpSession`
pub fn idp_refresh(token: &str) -> String {
    format!("idp_refresh:{}", token)
}

/// Email -> current IdP-backed refresh token
pub fn idp_refresh_owner(email: &str) -> String {
    format!("idp_refresh_owner:{}", email)
}

/// Confirmation token -> `PendingSignup`
pub fn pending_signup(token: &str) -> String {
    format!("signup:{}", token)
}

/// Per-email signup lock
pub fn signup_lock(email: &str) -> String {
    format!("signup_lock:{}", email)
}

/// Per-IP signup counter
pub fn signup_ip(ip: &str) -> String {
    format!("signup_ip:{}", ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_families_do_not_collide() {
        let token = "abc";
        assert_ne!(refresh(token), idp_refresh(token));
        assert_ne!(refresh_owner(token), idp_refresh_owner(token));
        assert_ne!(refresh(token), refresh_owner(token));
    }
}
