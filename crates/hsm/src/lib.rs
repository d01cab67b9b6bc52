//! Hardware-backed secret-at-rest for short PINs.
//!
//! This crate seals PINs (up to 256 bytes) to per-identity keys held by the
//! strongest trust root the host provides, and unseals them under the
//! backend's authorization gate. Callers write once against a single API and
//! get whatever protection the platform can offer.
//!
//! # Backends
//!
//! In preference order:
//!
//! - **TPM 2.0** (`hardware-tpm` feature): the PIN is sealed under an
//!   owner-hierarchy primary key with a policy bound to a PCR selection
//!   (default: PCR 7, the Secure Boot state). Unsealing fails with
//!   [`HsmError::PcrMismatch`] when the boot chain changed.
//! - **Secure element**: a per-identity device-bound P-256 key encrypts the
//!   PIN (ECIES); decryption happens inside the element and may require
//!   user presence. Reached through the [`ElementProvider`] interface.
//! - **Credential store**: the PIN is kept in the OS credential store,
//!   protected only by the OS. Least preferred, always available.
//!
//! # Security Model
//!
//! - Identity names are validated before any backend dispatch.
//! - Unsealed PINs live in a [`SecretBuffer`] for the span of one consumer
//!   callback and are zeroized on every return path, including panics.
//! - Backend-native handles are released on every exit path by a scoped
//!   guard; nothing relies on implicit finalizers.
//!
//! # Example
//!
//! ```
//! use pinseal_hsm::HsmService;
//!
//! let hsm = HsmService::new();
//! if hsm.is_available() {
//!     hsm.seal_pin("work", b"123456")?;
//!     hsm.unseal_pin("work", |pin| {
//!         assert_eq!(pin, b"123456");
//!         0
//!     })?;
//!     hsm.clear_pin("work")?;
//! }
//! # Ok::<(), pinseal_hsm::HsmError>(())
//! ```

pub mod credential_store;
mod ecies;
pub mod error;
mod guard;
pub mod identity;
pub mod logging;
pub mod probe;
pub mod secret;
pub mod secure_element;
pub mod service;
pub mod status;
pub mod tpm;

pub use credential_store::{MemoryStore, SecretStore};
#[cfg(feature = "os-credential-store")]
pub use credential_store::OsStore;
pub use error::{HsmError, Result};
pub use identity::{validate_identity, validate_pin, MAX_IDENTITY_LEN, MAX_PIN_LEN};
pub use probe::BackendKind;
pub use secret::SecretBuffer;
pub use secure_element::{AuthOutcome, ElementProvider, SoftwareElement};
pub use service::{global, HsmService, HsmServiceBuilder, DEFAULT_PREFIX};
pub use status::{HsmStatus, SecureElementFacts, TpmFacts};
pub use tpm::DEFAULT_PCR_MASK;
