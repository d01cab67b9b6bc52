//! Backend status descriptor.

use serde::Serialize;

use crate::error::{HsmError, Result};
use crate::probe::BackendKind;

/// Observed backend and its host-specific facts.
#[derive(Debug, Clone, Serialize)]
pub struct HsmStatus {
    /// The backend the probe selected.
    pub backend: BackendKind,
    /// Whether any backend is usable.
    pub available: bool,
    /// Human-readable backend name.
    pub description: String,
    /// Service version.
    pub version: String,
    /// TPM facts, when the TPM backend is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmFacts>,
    /// Secure-element facts, when that backend is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_element: Option<SecureElementFacts>,
    /// Whether a sealed artifact exists for the queried identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_exists: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TpmFacts {
    /// Manufacturer id decoded to its four-character ASCII form.
    pub manufacturer: String,
    pub firmware_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecureElementFacts {
    pub biometry_available: bool,
    /// Whether an element key exists for the queried identity.
    pub key_exists: bool,
}

impl HsmStatus {
    /// JSON rendering for status consumers.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| HsmError::Internal(e.to_string()))
    }
}
