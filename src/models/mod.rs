// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod account;
pub mod audit;
pub mod session;

pub use account::{normalize_email, Account, NewAccount};
pub use audit::{AuthPath, LoginAuditEvent};
pub use session::{IdpSession, PendingSignup, RefreshSession, SessionRecord};
