// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection and security configuration types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// SecurityMode / SecurityPolicy
// =============================================================================

/// Message security mode of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No signing or encryption.
    #[default]
    None,

    /// Messages are signed.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Sign => write!(f, "Sign"),
            Self::SignAndEncrypt => write!(f, "SignAndEncrypt"),
        }
    }
}

/// Security policy of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security.
    #[default]
    None,

    /// Basic256Sha256 policy.
    Basic256Sha256,

    /// Aes128-Sha256-RsaOaep policy.
    Aes128Sha256RsaOaep,

    /// Aes256-Sha256-RsaPss policy.
    Aes256Sha256RsaPss,
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Basic256Sha256 => write!(f, "Basic256Sha256"),
            Self::Aes128Sha256RsaOaep => write!(f, "Aes128Sha256RsaOaep"),
            Self::Aes256Sha256RsaPss => write!(f, "Aes256Sha256RsaPss"),
        }
    }
}

/// One acceptable (mode, policy) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Message security mode.
    pub mode: SecurityMode,

    /// Security policy.
    pub policy: SecurityPolicy,
}

impl SecurityConfig {
    /// The unsecured configuration.
    pub const fn none() -> Self {
        Self {
            mode: SecurityMode::None,
            policy: SecurityPolicy::None,
        }
    }
}

impl fmt::Display for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mode, self.policy)
    }
}

// =============================================================================
// ConnectionSettings
// =============================================================================

/// Immutable per-session connection settings.
///
/// Sessions are pooled by (endpoint identity, connection settings); two
/// settings values that compare equal share a pooled session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Timeout for the connect handshake.
    pub connect_timeout: Duration,

    /// Requested session timeout.
    pub session_timeout: Duration,

    /// Acceptable security configurations, ordered by preference. The first
    /// configuration the endpoint also offers is selected.
    pub security_preferences: Vec<SecurityConfig>,

    /// Application URI presented to the server.
    pub application_uri: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(60),
            security_preferences: vec![SecurityConfig::none()],
            application_uri: "urn:uapool:client".to_string(),
        }
    }
}

// =============================================================================
// ClientSettings
// =============================================================================

/// Client-wide settings owned by the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Default per-operation timeout when the request does not set one.
    pub default_timeout: Duration,

    /// Interval recommended between housekeeping runs.
    pub housekeeping_interval: Duration,

    /// Application name presented to servers.
    pub application_name: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            housekeeping_interval: Duration::from_secs(30),
            application_name: "uapool".to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
