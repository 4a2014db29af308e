//! Stable, content-derived operator identities.
//!
//! An [`OperatorId`] depends only on the logical name it was generated
//! from, so a stage keeps its identity across restarts and across
//! re-compositions of the same definition.
//!
//! Version 1 of the scheme is
//! `SHA-256("cdcflow/operator-id/v1" || 0x00 || utf8(name))`, truncated
//! to the first 16 bytes and rendered as 32 lowercase hex characters.

use sha2::{Digest, Sha256};

const DOMAIN_V1: &[u8] = b"cdcflow/operator-id/v1";

/// 16-byte operator identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId([u8; 16]);

impl OperatorId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        use std::fmt::Write as _;
        self.0.iter().fold(String::with_capacity(32), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
    }
}

impl std::fmt::Display for OperatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for OperatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorId({})", self.to_hex())
    }
}

/// Derives the [`OperatorId`] of one logical stage name.
#[derive(Debug, Clone)]
pub struct OperatorIdGenerator {
    name: String,
}

impl OperatorIdGenerator {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn generate(&self) -> OperatorId {
        generate(&self.name)
    }
}

/// Identity of `name` under scheme version 1.
#[must_use]
pub fn generate(name: &str) -> OperatorId {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_V1);
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    OperatorId(id)
}
