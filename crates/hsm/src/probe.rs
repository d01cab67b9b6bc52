//! Backend kinds and their selection order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The trust roots a host may offer, in increasing order of preference:
/// `None < CredentialStore < SecureElement < Tpm`.
///
/// The probe picks the strongest available kind once per process; the
/// selection is stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// No backend available on this host.
    None,
    /// OS credential store, relying on OS protection only. Least preferred.
    CredentialStore,
    /// Device-bound asymmetric keys with an optional user-presence gate.
    SecureElement,
    /// TPM 2.0 sealing bound to platform boot state.
    Tpm,
}

impl BackendKind {
    /// Human-readable backend name.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::None => "none",
            BackendKind::CredentialStore => "OS credential store (fallback)",
            BackendKind::SecureElement => "secure element",
            BackendKind::Tpm => "TPM 2.0",
        }
    }

    /// Whether this kind represents a usable backend.
    pub fn is_available(self) -> bool {
        self != BackendKind::None
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_order() {
        assert!(BackendKind::Tpm > BackendKind::SecureElement);
        assert!(BackendKind::SecureElement > BackendKind::CredentialStore);
        assert!(BackendKind::CredentialStore > BackendKind::None);
    }

    #[test]
    fn availability() {
        assert!(!BackendKind::None.is_available());
        assert!(BackendKind::Tpm.is_available());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&BackendKind::SecureElement).unwrap();
        assert_eq!(json, "\"secure_element\"");
        let json = serde_json::to_string(&BackendKind::CredentialStore).unwrap();
        assert_eq!(json, "\"credential_store\"");
    }
}
