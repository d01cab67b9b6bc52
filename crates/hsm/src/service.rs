//! Dispatcher façade: input validation, backend selection, and operation
//! routing.
//!
//! [`HsmService`] validates every identity and PIN at the boundary, probes
//! for the strongest available trust root exactly once, and routes each
//! operation to the active backend. Configuration (PCR binding,
//! user-presence requirement) is process-wide state read with acquire/
//! release ordering; per-identity operations never serialize against each
//! other.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crate::credential_store::{self, SecretStore};
use crate::error::{HsmError, Result};
use crate::identity::{validate_identity, validate_pin};
use crate::probe::BackendKind;
use crate::secret::SecretBuffer;
use crate::secure_element::{self, ElementProvider};
use crate::status::{HsmStatus, SecureElementFacts};
use crate::tpm;

/// Default naming prefix for persisted artifacts.
pub const DEFAULT_PREFIX: &str = "com.pinseal";

#[cfg(not(feature = "hardware-tpm"))]
const TPM_NOT_COMPILED: &str = "TPM support not compiled in";

/// The PIN sealing service.
///
/// One instance probes once and keeps its backend for the process lifetime.
/// All operations take `&self` and are safe to call from parallel threads;
/// operations on distinct identities proceed independently.
pub struct HsmService {
    backend: OnceLock<BackendKind>,
    initialized: AtomicBool,
    pcr_mask: AtomicU32,
    user_presence: AtomicBool,
    prefix: String,
    data_dir: Option<PathBuf>,
    element: Option<Arc<dyn ElementProvider>>,
    store: Arc<dyn SecretStore>,
}

/// Builder for [`HsmService`], the single place where probe inputs and
/// storage roots can be overridden (primarily by tests and embedders).
pub struct HsmServiceBuilder {
    prefix: String,
    data_dir: Option<PathBuf>,
    element: Option<Arc<dyn ElementProvider>>,
    store: Option<Arc<dyn SecretStore>>,
}

impl HsmServiceBuilder {
    /// Naming prefix for credential-store services and element key tags.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Directory for TPM sealed artifacts.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Secure-element provider to probe and use.
    pub fn element_provider(mut self, element: Arc<dyn ElementProvider>) -> Self {
        self.element = Some(element);
        self
    }

    /// Credential store to use instead of the build-time default.
    pub fn secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> HsmService {
        let store = self.store.unwrap_or_else(default_store);
        HsmService {
            backend: OnceLock::new(),
            initialized: AtomicBool::new(false),
            pcr_mask: AtomicU32::new(tpm::DEFAULT_PCR_MASK),
            user_presence: AtomicBool::new(false),
            prefix: self.prefix,
            data_dir: self.data_dir,
            element: self.element,
            store,
        }
    }
}

#[cfg(feature = "os-credential-store")]
fn default_store() -> Arc<dyn SecretStore> {
    Arc::new(credential_store::OsStore::new(format!("{DEFAULT_PREFIX}.index")))
}

#[cfg(not(feature = "os-credential-store"))]
fn default_store() -> Arc<dyn SecretStore> {
    tracing::warn!(
        "using the in-process credential store; secrets will not outlive this process. \
         Build with `os-credential-store` for the platform store."
    );
    Arc::new(credential_store::MemoryStore::new())
}

impl HsmService {
    /// Service with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HsmServiceBuilder {
        HsmServiceBuilder {
            prefix: DEFAULT_PREFIX.to_string(),
            data_dir: None,
            element: None,
            store: None,
        }
    }

    /// Detect the strongest available backend. The first call probes; the
    /// result is cached for the lifetime of the service.
    pub fn detect(&self) -> BackendKind {
        *self.backend.get_or_init(|| {
            let kind = self.probe();
            tracing::debug!(backend = %kind, "backend selected");
            kind
        })
    }

    /// Whether any backend is usable on this host.
    pub fn is_available(&self) -> bool {
        self.detect().is_available()
    }

    fn probe(&self) -> BackendKind {
        #[cfg(feature = "hardware-tpm")]
        if tpm::engine::available() {
            return BackendKind::Tpm;
        }

        if let Some(element) = &self.element {
            match element.probe_ephemeral() {
                Ok(()) => return BackendKind::SecureElement,
                Err(error) => tracing::debug!(%error, "secure element probe failed"),
            }
        }

        if self.store.available() {
            return BackendKind::CredentialStore;
        }

        BackendKind::None
    }

    /// Prepare the active backend. Idempotent; seal and unseal call this
    /// themselves when needed.
    pub fn initialize(&self) -> Result<()> {
        match self.detect() {
            BackendKind::Tpm => {
                self.tpm_handshake()?;
                tpm::ensure_dir(&self.data_dir()?)?;
            }
            BackendKind::SecureElement | BackendKind::CredentialStore => {}
            BackendKind::None => {
                return Err(HsmError::NotAvailable("no backend on this host".into()))
            }
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            self.initialize()?;
        }
        Ok(())
    }

    /// Seal a PIN for an identity, replacing any prior artifact.
    pub fn seal_pin(&self, identity: &str, pin: &[u8]) -> Result<()> {
        validate_identity(identity)?;
        validate_pin(pin)?;
        self.ensure_initialized()?;

        let backend = self.detect();
        tracing::debug!(identity, backend = %backend, pin_len = pin.len(), "sealing PIN");
        match backend {
            BackendKind::Tpm => self.tpm_seal(identity, pin),
            BackendKind::SecureElement => secure_element::seal(
                self.element()?,
                self.store.as_ref(),
                &self.prefix,
                identity,
                pin,
                self.user_presence.load(Ordering::Acquire),
            ),
            BackendKind::CredentialStore => {
                credential_store::seal(self.store.as_ref(), &self.prefix, identity, pin)
            }
            BackendKind::None => Err(HsmError::NotAvailable("no backend on this host".into())),
        }
    }

    /// Unseal the PIN for an identity and hand `consumer` a transient view.
    ///
    /// The view is invalid once `consumer` returns; the backing buffer is
    /// zeroized on every path out of this function. A non-zero consumer
    /// return maps to [`HsmError::Internal`] and leaves the artifact in
    /// place.
    pub fn unseal_pin<F>(&self, identity: &str, consumer: F) -> Result<()>
    where
        F: FnOnce(&[u8]) -> i32,
    {
        validate_identity(identity)?;
        self.ensure_initialized()?;

        let backend = self.detect();
        tracing::debug!(identity, backend = %backend, "unsealing PIN");
        let buffer: SecretBuffer = match backend {
            BackendKind::Tpm => self.tpm_unseal(identity)?,
            BackendKind::SecureElement => secure_element::unseal(
                self.element()?,
                self.store.as_ref(),
                &self.prefix,
                identity,
            )?,
            BackendKind::CredentialStore => {
                credential_store::unseal(self.store.as_ref(), &self.prefix, identity)?
            }
            BackendKind::None => {
                return Err(HsmError::NotAvailable("no backend on this host".into()))
            }
        };

        let code = consumer(buffer.expose());
        drop(buffer);
        if code == 0 {
            Ok(())
        } else {
            Err(HsmError::Internal(format!("consumer returned {code}")))
        }
    }

    /// Whether a sealed artifact exists. Never prompts, never decrypts.
    pub fn pin_exists(&self, identity: &str) -> Result<bool> {
        validate_identity(identity)?;
        match self.detect() {
            BackendKind::Tpm => Ok(tpm::exists(&self.data_dir()?, identity)),
            BackendKind::SecureElement | BackendKind::CredentialStore => {
                credential_store::exists(self.store.as_ref(), &self.prefix, identity)
            }
            BackendKind::None => Err(HsmError::NotAvailable("no backend on this host".into())),
        }
    }

    /// Remove the sealed artifact for an identity.
    pub fn clear_pin(&self, identity: &str) -> Result<()> {
        validate_identity(identity)?;
        match self.detect() {
            BackendKind::Tpm => tpm::clear(&self.data_dir()?, identity),
            BackendKind::SecureElement => secure_element::clear(
                self.element()?,
                self.store.as_ref(),
                &self.prefix,
                identity,
            ),
            BackendKind::CredentialStore => {
                credential_store::clear(self.store.as_ref(), &self.prefix, identity)
            }
            BackendKind::None => Err(HsmError::NotAvailable("no backend on this host".into())),
        }
    }

    /// Remove every artifact owned by this service. Best effort; reports
    /// the first hard failure.
    pub fn clear_all(&self) -> Result<()> {
        match self.detect() {
            BackendKind::Tpm => tpm::clear_all(&self.data_dir()?),
            BackendKind::SecureElement => {
                secure_element::clear_all(self.element()?, self.store.as_ref(), &self.prefix)
            }
            BackendKind::CredentialStore => {
                credential_store::clear_all(self.store.as_ref(), &self.prefix)
            }
            BackendKind::None => Err(HsmError::NotAvailable("no backend on this host".into())),
        }
    }

    /// Identities with sealed artifacts in the active backend. Unordered.
    pub fn list_identities(&self) -> Result<Vec<String>> {
        match self.detect() {
            BackendKind::Tpm => tpm::list(&self.data_dir()?),
            BackendKind::SecureElement | BackendKind::CredentialStore => {
                credential_store::list(self.store.as_ref(), &self.prefix)
            }
            BackendKind::None => Err(HsmError::NotAvailable("no backend on this host".into())),
        }
    }

    /// Bind future seals to a PCR selection. TPM backend only.
    pub fn set_pcr_binding(&self, mask: u32) -> Result<()> {
        if self.detect() != BackendKind::Tpm {
            return Err(HsmError::NotAvailable(
                "PCR binding applies to the TPM backend only".into(),
            ));
        }
        if mask == 0 || mask & !tpm::PCR_MASK_VALID != 0 {
            return Err(HsmError::InvalidIdentity(
                "PCR mask must select at least one of PCRs 0-23".into(),
            ));
        }
        self.pcr_mask.store(mask, Ordering::Release);
        Ok(())
    }

    /// Require user presence for future element keys. Secure-element
    /// backend only. Keys created earlier keep their access control.
    pub fn set_user_presence(&self, required: bool) -> Result<()> {
        if self.detect() != BackendKind::SecureElement {
            return Err(HsmError::NotAvailable(
                "user presence applies to the secure-element backend only".into(),
            ));
        }
        self.user_presence.store(required, Ordering::Release);
        Ok(())
    }

    /// Status descriptor, optionally scoped to one identity.
    pub fn status(&self, identity: Option<&str>) -> Result<HsmStatus> {
        if let Some(identity) = identity {
            validate_identity(identity)?;
        }
        let backend = self.detect();
        let mut status = HsmStatus {
            backend,
            available: backend.is_available(),
            description: backend.name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tpm: None,
            secure_element: None,
            artifact_exists: None,
        };

        match backend {
            BackendKind::Tpm => status.tpm = self.tpm_facts().ok(),
            BackendKind::SecureElement => {
                let element = self.element()?;
                let key_exists = match identity {
                    Some(identity) => {
                        element.key_exists(&secure_element::key_tag(&self.prefix, identity))?
                    }
                    None => false,
                };
                status.secure_element = Some(SecureElementFacts {
                    biometry_available: element.biometry_available(),
                    key_exists,
                });
            }
            _ => {}
        }

        if let Some(identity) = identity {
            if backend.is_available() {
                status.artifact_exists = Some(self.pin_exists(identity)?);
            }
        }
        Ok(status)
    }

    fn element(&self) -> Result<&dyn ElementProvider> {
        self.element
            .as_deref()
            .ok_or_else(|| HsmError::SeNotReady("no secure element provider".into()))
    }

    fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => tpm::default_data_dir(),
        }
    }

    #[cfg(feature = "hardware-tpm")]
    fn tpm_handshake(&self) -> Result<()> {
        tpm::engine::handshake()
    }

    #[cfg(not(feature = "hardware-tpm"))]
    fn tpm_handshake(&self) -> Result<()> {
        Err(HsmError::NotAvailable(TPM_NOT_COMPILED.into()))
    }

    #[cfg(feature = "hardware-tpm")]
    fn tpm_seal(&self, identity: &str, pin: &[u8]) -> Result<()> {
        tpm::engine::seal(
            &self.data_dir()?,
            identity,
            pin,
            self.pcr_mask.load(Ordering::Acquire),
        )
    }

    #[cfg(not(feature = "hardware-tpm"))]
    fn tpm_seal(&self, _identity: &str, _pin: &[u8]) -> Result<()> {
        Err(HsmError::NotAvailable(TPM_NOT_COMPILED.into()))
    }

    #[cfg(feature = "hardware-tpm")]
    fn tpm_unseal(&self, identity: &str) -> Result<SecretBuffer> {
        tpm::engine::unseal(
            &self.data_dir()?,
            identity,
            self.pcr_mask.load(Ordering::Acquire),
        )
    }

    #[cfg(not(feature = "hardware-tpm"))]
    fn tpm_unseal(&self, _identity: &str) -> Result<SecretBuffer> {
        Err(HsmError::NotAvailable(TPM_NOT_COMPILED.into()))
    }

    #[cfg(feature = "hardware-tpm")]
    fn tpm_facts(&self) -> Result<crate::status::TpmFacts> {
        tpm::engine::facts()
    }

    #[cfg(not(feature = "hardware-tpm"))]
    fn tpm_facts(&self) -> Result<crate::status::TpmFacts> {
        Err(HsmError::NotAvailable(TPM_NOT_COMPILED.into()))
    }
}

impl Default for HsmService {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide service instance with default configuration.
pub fn global() -> &'static HsmService {
    static GLOBAL: OnceLock<HsmService> = OnceLock::new();
    GLOBAL.get_or_init(HsmService::new)
}
