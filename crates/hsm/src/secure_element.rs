//! Secure-element backend: per-identity device-bound P-256 keys, with the
//! PIN encrypted to the key's public half and the ciphertext kept in the
//! credential store.
//!
//! The element itself is reached through the narrow [`ElementProvider`]
//! interface. Decryption happens inside the element and may gate on user
//! presence; the PIN ciphertext is useless without the element key.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};

use crate::credential_store::{self, SecretStore};
use crate::ecies;
use crate::error::{HsmError, Result};
use crate::secret::SecretBuffer;

/// Outcome of a user-presence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The user satisfied the presence check.
    Approved,
    /// The check ran and the user failed it.
    Denied,
    /// The user dismissed the prompt.
    Cancelled,
}

/// Narrow interface over a secure element's key manager.
pub trait ElementProvider: Send + Sync {
    /// Generate and immediately discard a device-bound P-256 key. Success
    /// means the element is usable on this host; no persistent state is
    /// left behind.
    fn probe_ephemeral(&self) -> Result<()>;

    /// Whether a key with this tag exists.
    fn key_exists(&self, tag: &str) -> Result<bool>;

    /// Look up the tagged key, creating it when absent. The user-presence
    /// requirement is part of the key's access control and is fixed at
    /// creation time.
    fn ensure_key(&self, tag: &str, require_presence: bool) -> Result<()>;

    /// SEC1-encoded public half of the tagged key.
    fn public_key(&self, tag: &str) -> Result<Vec<u8>>;

    /// Decrypt inside the element. When the key's access control requires
    /// user presence, the element verifies the user first, showing `reason`.
    fn decrypt(&self, tag: &str, ciphertext: &[u8], reason: &str) -> Result<SecretBuffer>;

    /// Remove the tagged key. Absent keys are not an error.
    fn delete_key(&self, tag: &str) -> Result<()>;

    /// Whether a biometric presence check is available.
    fn biometry_available(&self) -> bool;
}

type Authorizer = Box<dyn Fn(&str) -> AuthOutcome + Send + Sync>;

struct ElementKey {
    secret: SecretKey,
    require_presence: bool,
}

/// Software stand-in for a secure element.
///
/// Keys live in process memory, so nothing here is device-bound: use a
/// hardware-backed provider wherever the host offers one. The cryptography
/// is real, which makes this the element used by tests and by hosts whose
/// element integration is handled elsewhere.
pub struct SoftwareElement {
    keys: RwLock<HashMap<String, ElementKey>>,
    authorizer: Authorizer,
}

impl SoftwareElement {
    /// Element whose presence checks always pass.
    pub fn new() -> Self {
        Self::with_authorizer(|_| AuthOutcome::Approved)
    }

    /// Element with a caller-supplied presence check. The authorizer
    /// receives the localized prompt reason and decides the outcome.
    pub fn with_authorizer<F>(authorizer: F) -> Self
    where
        F: Fn(&str) -> AuthOutcome + Send + Sync + 'static,
    {
        Self {
            keys: RwLock::new(HashMap::new()),
            authorizer: Box::new(authorizer),
        }
    }
}

impl Default for SoftwareElement {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SoftwareElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.keys.read().map(|k| k.len()).unwrap_or(0);
        f.debug_struct("SoftwareElement").field("keys", &count).finish()
    }
}

impl ElementProvider for SoftwareElement {
    fn probe_ephemeral(&self) -> Result<()> {
        let _ephemeral = SecretKey::random(&mut OsRng);
        tracing::trace!("ephemeral element key generated and discarded");
        Ok(())
    }

    fn key_exists(&self, tag: &str) -> Result<bool> {
        let keys = self
            .keys
            .read()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        Ok(keys.contains_key(tag))
    }

    fn ensure_key(&self, tag: &str, require_presence: bool) -> Result<()> {
        let mut keys = self
            .keys
            .write()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        keys.entry(tag.to_string()).or_insert_with(|| {
            tracing::debug!(tag, require_presence, "creating element key");
            ElementKey {
                secret: SecretKey::random(&mut OsRng),
                require_presence,
            }
        });
        Ok(())
    }

    fn public_key(&self, tag: &str) -> Result<Vec<u8>> {
        let keys = self
            .keys
            .read()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        let key = keys
            .get(tag)
            .ok_or_else(|| HsmError::Internal(format!("element key '{tag}' missing")))?;
        Ok(key.secret.public_key().to_encoded_point(false).as_bytes().to_vec())
    }

    fn decrypt(&self, tag: &str, ciphertext: &[u8], reason: &str) -> Result<SecretBuffer> {
        let (secret, require_presence) = {
            let keys = self
                .keys
                .read()
                .map_err(|e| HsmError::Internal(e.to_string()))?;
            let key = keys
                .get(tag)
                .ok_or_else(|| HsmError::UnsealFailed(format!("element key '{tag}' missing")))?;
            (key.secret.clone(), key.require_presence)
        };

        // The presence check may block on the user; no lock is held here.
        if require_presence {
            match (self.authorizer)(reason) {
                AuthOutcome::Approved => {}
                AuthOutcome::Denied => {
                    return Err(HsmError::AuthFailed("user presence check failed".into()))
                }
                AuthOutcome::Cancelled => return Err(HsmError::Cancelled),
            }
        }

        ecies::decrypt(&secret, ciphertext).map(SecretBuffer::from_vec)
    }

    fn delete_key(&self, tag: &str) -> Result<()> {
        let mut keys = self
            .keys
            .write()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        keys.remove(tag);
        Ok(())
    }

    fn biometry_available(&self) -> bool {
        true
    }
}

/// Element key tag for an identity.
pub(crate) fn key_tag(prefix: &str, identity: &str) -> String {
    format!("{prefix}.se-key.{identity}")
}

/// Localized reason shown when the element gates decryption on presence.
fn prompt_reason(identity: &str) -> String {
    format!("authenticate to access PIN for identity '{identity}'")
}

pub(crate) fn seal(
    element: &dyn ElementProvider,
    store: &dyn SecretStore,
    prefix: &str,
    identity: &str,
    pin: &[u8],
    require_presence: bool,
) -> Result<()> {
    let tag = key_tag(prefix, identity);
    element.ensure_key(&tag, require_presence)?;
    let public = element.public_key(&tag)?;
    let recipient = PublicKey::from_sec1_bytes(&public)
        .map_err(|_| HsmError::SealFailed("element returned a malformed public key".into()))?;
    let ciphertext = ecies::encrypt(&recipient, pin)?;
    // Single-entry overwrite: a prior ciphertext never remains visible.
    store.put(
        &credential_store::pin_service(prefix, identity),
        identity,
        &ciphertext,
    )
}

pub(crate) fn unseal(
    element: &dyn ElementProvider,
    store: &dyn SecretStore,
    prefix: &str,
    identity: &str,
) -> Result<SecretBuffer> {
    let ciphertext = store.get(&credential_store::pin_service(prefix, identity), identity)?;
    element.decrypt(&key_tag(prefix, identity), &ciphertext, &prompt_reason(identity))
}

pub(crate) fn clear(
    element: &dyn ElementProvider,
    store: &dyn SecretStore,
    prefix: &str,
    identity: &str,
) -> Result<()> {
    let removed = store.delete(&credential_store::pin_service(prefix, identity), identity);
    if let Err(error) = element.delete_key(&key_tag(prefix, identity)) {
        tracing::debug!(%error, identity, "element key removal failed");
    }
    removed
}

pub(crate) fn clear_all(
    element: &dyn ElementProvider,
    store: &dyn SecretStore,
    prefix: &str,
) -> Result<()> {
    let mut first_failure = None;
    for identity in credential_store::list(store, prefix)? {
        match clear(element, store, prefix, &identity) {
            Ok(()) | Err(HsmError::NotFound(_)) => {}
            Err(e) if first_failure.is_none() => first_failure = Some(e),
            Err(_) => {}
        }
    }
    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
