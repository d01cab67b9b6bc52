//! Identity naming rules and boundary validation.
//!
//! Identities are short printable names that partition the keyspace. They are
//! validated before any backend dispatch so that an invalid name never
//! reaches a backend, a file path, or a credential-store service name.

use crate::error::{HsmError, Result};

/// Maximum identity name length in bytes.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Maximum PIN length in bytes.
pub const MAX_PIN_LEN: usize = 256;

/// Validate an identity name.
///
/// Accepted names are 1..=64 bytes drawn from printable ASCII (0x20..=0x7E)
/// excluding `/`, `\` and `.`, which would be meaningful to file paths and
/// service-name schemes.
pub fn validate_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(HsmError::InvalidIdentity("identity must not be empty".into()));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(HsmError::InvalidIdentity(format!(
            "identity exceeds {MAX_IDENTITY_LEN} bytes"
        )));
    }
    for &byte in identity.as_bytes() {
        if !(0x20..=0x7e).contains(&byte) {
            return Err(HsmError::InvalidIdentity(
                "identity contains a non-printable byte".into(),
            ));
        }
        if matches!(byte, b'/' | b'\\' | b'.') {
            return Err(HsmError::InvalidIdentity(format!(
                "identity contains reserved character '{}'",
                byte as char
            )));
        }
    }
    Ok(())
}

/// Validate a PIN. PINs are opaque bytes of length 1..=256.
pub fn validate_pin(pin: &[u8]) -> Result<()> {
    if pin.is_empty() {
        return Err(HsmError::InvalidIdentity("PIN must not be empty".into()));
    }
    if pin.len() > MAX_PIN_LEN {
        return Err(HsmError::InvalidIdentity(format!(
            "PIN exceeds {MAX_PIN_LEN} bytes"
        )));
    }
    Ok(())
}
