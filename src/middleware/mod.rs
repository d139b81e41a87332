// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (authentication, client identification, security).

pub mod auth;
pub mod client;
pub mod security;

pub use auth::require_auth;
