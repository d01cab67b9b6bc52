//! Credential-store access for the fallback backend and for secure-element
//! ciphertexts.
//!
//! Entries are addressed by a `<service, account>` pair. The PIN for
//! identity `i` lives at service `<prefix>.pin.<i>`, account `i`; the
//! secure-element backend stores its ECIES ciphertext under the same scheme.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{HsmError, Result};
use crate::secret::SecretBuffer;

/// Narrow interface over a credential store.
///
/// Implementations must be safe for concurrent use; operations on distinct
/// entries proceed in parallel, and same-entry writes resolve to some serial
/// order with the last write winning.
pub trait SecretStore: Send + Sync {
    /// Store (or replace) a secret. The replace is atomic from the caller's
    /// perspective: a concurrent read sees either the old or the new value.
    fn put(&self, service: &str, account: &str, secret: &[u8]) -> Result<()>;

    /// Fetch a secret. Absent entries yield [`HsmError::NotFound`].
    fn get(&self, service: &str, account: &str) -> Result<Vec<u8>>;

    /// Remove a secret. Absent entries yield [`HsmError::NotFound`].
    fn delete(&self, service: &str, account: &str) -> Result<()>;

    /// Whether an entry exists. Never prompts and never decrypts.
    fn exists(&self, service: &str, account: &str) -> Result<bool>;

    /// Service names beginning with `prefix`.
    fn list_services(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether the store is usable at all on this host.
    fn available(&self) -> bool {
        true
    }
}

/// In-process store used when the crate is built without
/// `os-credential-store`.
///
/// Secrets do not outlive the process. This mirrors the platform store's
/// surface so the fallback backend and tests behave identically against
/// either implementation.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemoryStore {
    fn put(&self, service: &str, account: &str, secret: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        entries.insert((service.to_string(), account.to_string()), secret.to_vec());
        Ok(())
    }

    fn get(&self, service: &str, account: &str) -> Result<Vec<u8>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        entries
            .get(&(service.to_string(), account.to_string()))
            .cloned()
            .ok_or_else(|| HsmError::NotFound(account.to_string()))
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        entries
            .remove(&(service.to_string(), account.to_string()))
            .map(|_| ())
            .ok_or_else(|| HsmError::NotFound(account.to_string()))
    }

    fn exists(&self, service: &str, account: &str) -> Result<bool> {
        let entries = self
            .entries
            .read()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        Ok(entries.contains_key(&(service.to_string(), account.to_string())))
    }

    fn list_services(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| HsmError::Internal(e.to_string()))?;
        Ok(entries
            .keys()
            .filter(|(service, _)| service.starts_with(prefix))
            .map(|(service, _)| service.clone())
            .collect())
    }
}

#[cfg(feature = "os-credential-store")]
pub use os_store::OsStore;

#[cfg(feature = "os-credential-store")]
mod os_store {
    use std::sync::Mutex;

    use super::{HsmError, Result, SecretStore};

    /// Native credential store via the `keyring` crate.
    ///
    /// The platform stores expose no enumeration, so the registry of known
    /// entries is kept in a JSON index entry under `<index_service>`;
    /// read-modify-write of the index is serialized by an internal lock.
    pub struct OsStore {
        index_service: String,
        index_lock: Mutex<()>,
    }

    impl OsStore {
        pub fn new(index_service: impl Into<String>) -> Self {
            Self {
                index_service: index_service.into(),
                index_lock: Mutex::new(()),
            }
        }

        fn entry(service: &str, account: &str) -> Result<keyring::Entry> {
            keyring::Entry::new(service, account).map_err(|e| map_store_error(e, account))
        }

        fn index_entry(&self) -> Result<keyring::Entry> {
            Self::entry(&self.index_service, "entries")
        }

        fn read_index(&self) -> Result<Vec<(String, String)>> {
            match self.index_entry()?.get_secret() {
                Ok(raw) => serde_json::from_slice(&raw)
                    .map_err(|e| HsmError::Internal(format!("corrupt entry index: {e}"))),
                Err(keyring::Error::NoEntry) => Ok(Vec::new()),
                Err(e) => Err(map_store_error(e, "entries")),
            }
        }

        fn write_index(&self, index: &[(String, String)]) -> Result<()> {
            let raw = serde_json::to_vec(index)
                .map_err(|e| HsmError::Internal(format!("encoding entry index: {e}")))?;
            self.index_entry()?
                .set_secret(&raw)
                .map_err(|e| map_store_error(e, "entries"))
        }

        fn index_insert(&self, service: &str, account: &str) -> Result<()> {
            let _held = self.index_lock.lock().unwrap_or_else(|p| p.into_inner());
            let mut index = self.read_index()?;
            let key = (service.to_string(), account.to_string());
            if !index.contains(&key) {
                index.push(key);
                self.write_index(&index)?;
            }
            Ok(())
        }

        fn index_remove(&self, service: &str, account: &str) -> Result<()> {
            let _held = self.index_lock.lock().unwrap_or_else(|p| p.into_inner());
            let mut index = self.read_index()?;
            let before = index.len();
            index.retain(|(s, a)| s != service || a != account);
            if index.len() != before {
                self.write_index(&index)?;
            }
            Ok(())
        }
    }

    impl SecretStore for OsStore {
        fn put(&self, service: &str, account: &str, secret: &[u8]) -> Result<()> {
            Self::entry(service, account)?
                .set_secret(secret)
                .map_err(|e| map_store_error(e, account))?;
            self.index_insert(service, account)
        }

        fn get(&self, service: &str, account: &str) -> Result<Vec<u8>> {
            Self::entry(service, account)?
                .get_secret()
                .map_err(|e| map_store_error(e, account))
        }

        fn delete(&self, service: &str, account: &str) -> Result<()> {
            Self::entry(service, account)?
                .delete_credential()
                .map_err(|e| map_store_error(e, account))?;
            self.index_remove(service, account)
        }

        fn exists(&self, service: &str, account: &str) -> Result<bool> {
            match Self::entry(service, account)?.get_secret() {
                Ok(_) => Ok(true),
                Err(keyring::Error::NoEntry) => Ok(false),
                Err(e) => Err(map_store_error(e, account)),
            }
        }

        fn list_services(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .read_index()?
                .into_iter()
                .filter(|(service, _)| service.starts_with(prefix))
                .map(|(service, _)| service)
                .collect())
        }

        fn available(&self) -> bool {
            keyring::Entry::new(&self.index_service, "entries").is_ok()
        }
    }

    fn map_store_error(error: keyring::Error, account: &str) -> HsmError {
        tracing::debug!(raw = %error, account, "credential store error");
        match error {
            keyring::Error::NoEntry => HsmError::NotFound(account.to_string()),
            keyring::Error::NoStorageAccess(e) => HsmError::AuthFailed(e.to_string()),
            other => HsmError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

/// Service name holding the PIN (or its ciphertext) for `identity`.
pub(crate) fn pin_service(prefix: &str, identity: &str) -> String {
    format!("{prefix}.pin.{identity}")
}

/// Store a PIN in the credential store. Relies on OS protection only; this
/// is the least-preferred backend.
pub(crate) fn seal(store: &dyn SecretStore, prefix: &str, identity: &str, pin: &[u8]) -> Result<()> {
    store.put(&pin_service(prefix, identity), identity, pin)
}

pub(crate) fn unseal(store: &dyn SecretStore, prefix: &str, identity: &str) -> Result<SecretBuffer> {
    store
        .get(&pin_service(prefix, identity), identity)
        .map(SecretBuffer::from_vec)
}

pub(crate) fn exists(store: &dyn SecretStore, prefix: &str, identity: &str) -> Result<bool> {
    store.exists(&pin_service(prefix, identity), identity)
}

pub(crate) fn clear(store: &dyn SecretStore, prefix: &str, identity: &str) -> Result<()> {
    store.delete(&pin_service(prefix, identity), identity)
}

/// Identity names with a stored entry under `prefix`.
pub(crate) fn list(store: &dyn SecretStore, prefix: &str) -> Result<Vec<String>> {
    let service_prefix = format!("{prefix}.pin.");
    Ok(store
        .list_services(&service_prefix)?
        .into_iter()
        .filter_map(|service| {
            service
                .strip_prefix(&service_prefix)
                .map(|identity| identity.to_string())
        })
        .collect())
}

/// Remove every entry under `prefix`. Best effort: keeps going past absent
/// entries and reports the first hard failure.
pub(crate) fn clear_all(store: &dyn SecretStore, prefix: &str) -> Result<()> {
    let mut first_failure = None;
    for identity in list(store, prefix)? {
        match clear(store, prefix, &identity) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.put("svc.pin.a", "a", b"one").unwrap();
        assert_eq!(store.get("svc.pin.a", "a").unwrap(), b"one");
        assert!(store.exists("svc.pin.a", "a").unwrap());
        store.delete("svc.pin.a", "a").unwrap();
        assert!(!store.exists("svc.pin.a", "a").unwrap());
    }

    #[test]
    fn memory_store_get_absent_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("svc.pin.a", "a"),
            Err(HsmError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("svc.pin.a", "a"),
            Err(HsmError::NotFound(_))
        ));
    }

    #[test]
    fn memory_store_put_replaces() {
        let store = MemoryStore::new();
        store.put("svc.pin.a", "a", b"first").unwrap();
        store.put("svc.pin.a", "a", b"second").unwrap();
        assert_eq!(store.get("svc.pin.a", "a").unwrap(), b"second");
    }

    #[test]
    fn list_strips_service_prefix() {
        let store = MemoryStore::new();
        seal(&store, "com.example", "work", b"1234").unwrap();
        seal(&store, "com.example", "personal", b"5678").unwrap();
        seal(&store, "com.other", "hidden", b"0000").unwrap();
        let mut identities = list(&store, "com.example").unwrap();
        identities.sort();
        assert_eq!(identities, vec!["personal", "work"]);
    }

    #[test]
    fn clear_all_removes_only_this_prefix() {
        let store = MemoryStore::new();
        seal(&store, "com.example", "work", b"1234").unwrap();
        seal(&store, "com.other", "kept", b"0000").unwrap();
        clear_all(&store, "com.example").unwrap();
        assert!(list(&store, "com.example").unwrap().is_empty());
        assert_eq!(list(&store, "com.other").unwrap(), vec!["kept"]);
    }

    #[test]
    fn unseal_wraps_bytes_in_secret_buffer() {
        let store = MemoryStore::new();
        seal(&store, "com.example", "b", &[0x00, 0xFF, 0x42]).unwrap();
        let buffer = unseal(&store, "com.example", "b").unwrap();
        assert_eq!(buffer.expose(), &[0x00, 0xFF, 0x42]);
    }
}
