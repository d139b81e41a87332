// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login audit events (append-only).

use serde::{Deserialize, Serialize};

/// Which identity path produced an authentication outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPath {
    /// Password grant against the identity provider
    Idp,
    /// Legacy hash verified, session issued locally
    Legacy,
    /// Legacy hash verified and account moved to the identity provider
    LazyMigration,
    /// Local-only deployment
    Local,
    RefreshIdp,
    RefreshLocal,
}

/// Record of a single login or refresh attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAuditEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub ip: String,
    pub user_id: Option<u64>,
    pub email: String,
    pub user_agent: Option<String>,
    pub success: bool,
    pub path: AuthPath,
    pub reason: String,
}
