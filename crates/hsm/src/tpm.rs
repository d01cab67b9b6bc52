//! TPM 2.0 backend.
//!
//! The artifact store keeps one file per identity at
//! `<data-home>/pinseal/tpm-sealed/<identity>.tpm2` (mode 0600, directory
//! 0700) holding the length-prefixed marshalled public and private halves of
//! the sealed object. The sealing engine itself requires the `hardware-tpm`
//! feature and a reachable TPM; the store compiles everywhere so the wire
//! format and persistence behavior stay testable without hardware.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{HsmError, Result};
use crate::identity::validate_identity;

/// Sealed artifact file extension.
pub(crate) const SEALED_EXT: &str = "tpm2";

/// Default PCR binding: PCR 7, the Secure Boot state.
pub const DEFAULT_PCR_MASK: u32 = 1 << 7;

/// PCRs addressable by the binding mask (0..=23).
pub(crate) const PCR_MASK_VALID: u32 = 0x00FF_FFFF;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Artifact directory: `$XDG_DATA_HOME/pinseal/tpm-sealed`, falling back to
/// `$HOME/.local/share/pinseal/tpm-sealed`.
pub(crate) fn default_data_dir() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_DATA_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| HsmError::NotAvailable("neither XDG_DATA_HOME nor HOME is set".into()))?;
            PathBuf::from(home).join(".local").join("share")
        }
    };
    Ok(base.join("pinseal").join("tpm-sealed"))
}

/// Create the artifact directory with owner-only permissions.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

pub(crate) fn artifact_path(dir: &Path, identity: &str) -> PathBuf {
    dir.join(format!("{identity}.{SEALED_EXT}"))
}

/// Marshalled public and private halves of a sealed object.
///
/// File layout: `u16 be pub_size || pub || u16 be priv_size || priv`. The
/// blob contents are the trust root's native marshalled forms and are not
/// portable across hosts.
pub(crate) struct SealedBlob {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

impl SealedBlob {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.public.len() > u16::MAX as usize || self.private.len() > u16::MAX as usize {
            return Err(HsmError::Internal("sealed blob exceeds format bounds".into()));
        }
        let mut out = Vec::with_capacity(4 + self.public.len() + self.private.len());
        out.extend_from_slice(&(self.public.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.public);
        out.extend_from_slice(&(self.private.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.private);
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let malformed = || {
            HsmError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "malformed sealed artifact",
            ))
        };
        if data.len() < 2 {
            return Err(malformed());
        }
        let pub_size = u16::from_be_bytes([data[0], data[1]]) as usize;
        let priv_offset = 2 + pub_size;
        if data.len() < priv_offset + 2 {
            return Err(malformed());
        }
        let priv_size =
            u16::from_be_bytes([data[priv_offset], data[priv_offset + 1]]) as usize;
        let end = priv_offset + 2 + priv_size;
        if data.len() != end {
            return Err(malformed());
        }
        Ok(Self {
            public: data[2..priv_offset].to_vec(),
            private: data[priv_offset + 2..end].to_vec(),
        })
    }
}

/// Persist a sealed blob, replacing any prior artifact atomically
/// (write-temp + rename).
pub(crate) fn persist(dir: &Path, identity: &str, blob: &SealedBlob) -> Result<()> {
    ensure_dir(dir)?;
    let bytes = blob.to_bytes()?;
    let tmp = dir.join(format!(
        ".{identity}.{}.{}.tmp",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = fs::File::create(&tmp)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    let path = artifact_path(dir, identity);
    if let Err(e) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    tracing::debug!(identity, path = %path.display(), "sealed artifact written");
    Ok(())
}

pub(crate) fn load(dir: &Path, identity: &str) -> Result<SealedBlob> {
    let path = artifact_path(dir, identity);
    match fs::read(&path) {
        Ok(data) => SealedBlob::from_bytes(&data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(HsmError::NotFound(identity.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn exists(dir: &Path, identity: &str) -> bool {
    artifact_path(dir, identity).is_file()
}

/// Remove an artifact, overwriting it with zeros before the unlink.
pub(crate) fn clear(dir: &Path, identity: &str) -> Result<()> {
    let path = artifact_path(dir, identity);
    let metadata = match fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HsmError::NotFound(identity.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut file = fs::OpenOptions::new().write(true).open(&path)?;
    file.write_all(&vec![0u8; metadata.len() as usize])?;
    file.sync_all()?;
    drop(file);

    fs::remove_file(&path)?;
    tracing::debug!(identity, "sealed artifact cleared");
    Ok(())
}

/// Remove every artifact in the directory. Best effort: reports the first
/// hard failure after attempting the rest.
pub(crate) fn clear_all(dir: &Path) -> Result<()> {
    let mut first_failure = None;
    for identity in list(dir)? {
        match clear(dir, &identity) {
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

/// Identities with an artifact on disk.
pub(crate) fn list(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut identities = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEALED_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if validate_identity(stem).is_ok() {
            identities.push(stem.to_string());
        }
    }
    Ok(identities)
}

#[cfg(feature = "hardware-tpm")]
pub(crate) mod engine {
    //! Seal/unseal against a TPM 2.0 through tpm2-tss.
    //!
    //! Sealing creates an RSA-2048 restricted decryption primary under the
    //! owner hierarchy, binds a policy digest to the configured PCR
    //! selection through a trial session, and seals the PIN as a keyedHash
    //! object carrying that digest. Unsealing replays the policy against
    //! live PCR values, so a changed boot chain surfaces as
    //! [`HsmError::PcrMismatch`].

    use std::str::FromStr;
    use std::sync::{Arc, Mutex};

    use tss_esapi::attributes::ObjectAttributesBuilder;
    use tss_esapi::constants::response_code::{FormatOneResponseCode, FormatZeroResponseCode};
    use tss_esapi::constants::tss::{
        TPM2_PT_FIRMWARE_VERSION_1, TPM2_PT_FIRMWARE_VERSION_2, TPM2_PT_MANUFACTURER,
        TPM2_RC_AUTH_CONTEXT, TPM2_RC_AUTH_FAIL, TPM2_RC_AUTH_MISSING, TPM2_RC_AUTH_TYPE,
        TPM2_RC_AUTH_UNAVAILABLE, TPM2_RC_BAD_AUTH, TPM2_RC_CANCELED, TPM2_RC_COMMAND_CODE,
        TPM2_RC_DISABLED, TPM2_RC_HANDLE, TPM2_RC_HIERARCHY, TPM2_RC_INITIALIZE,
        TPM2_RC_LOCALITY, TPM2_RC_MEMORY, TPM2_RC_NOT_USED, TPM2_RC_NV_AUTHORIZATION,
        TPM2_RC_OBJECT_HANDLES, TPM2_RC_OBJECT_MEMORY, TPM2_RC_PCR, TPM2_RC_PCR_CHANGED,
        TPM2_RC_POLICY_FAIL, TPM2_RC_REFERENCE_H0, TPM2_RC_REFERENCE_H1, TPM2_RC_REFERENCE_H2,
        TPM2_RC_RETRY, TPM2_RC_SESSION_HANDLES, TPM2_RC_SESSION_MEMORY, TPM2_RC_UPGRADE,
        TPM2_RC_YIELDED,
    };
    use tss_esapi::constants::{CapabilityType, SessionType, Tss2ResponseCode};
    use tss_esapi::handles::{ObjectHandle, SessionHandle};
    use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
    use tss_esapi::interface_types::key_bits::RsaKeyBits;
    use tss_esapi::interface_types::resource_handles::Hierarchy;
    use tss_esapi::interface_types::session_handles::{AuthSession, PolicySession};
    use tss_esapi::structures::{
        CapabilityData, Digest, KeyedHashScheme, PcrSelectionList, PcrSelectionListBuilder,
        PcrSlot, Private, Public, PublicBuilder, PublicKeyedHashParameters,
        PublicRsaParametersBuilder, RsaExponent, RsaScheme, SensitiveData, SymmetricDefinition,
        SymmetricDefinitionObject,
    };
    use tss_esapi::tcti_ldr::{DeviceConfig, TctiNameConf};
    use tss_esapi::traits::{Marshall, UnMarshall};
    use tss_esapi::Context;

    use super::{load, persist, SealedBlob};
    use crate::error::{HsmError, Result};
    use crate::guard::ResourceGuard;
    use crate::secret::SecretBuffer;
    use crate::status::TpmFacts;
    use std::path::Path;

    #[derive(Debug, Clone, Copy)]
    enum Phase {
        Seal,
        Unseal,
        /// PolicyPCR replay and the unseal itself: unclassified failures
        /// here almost always mean the PCR values moved.
        UnsealPolicy,
    }

    fn tcti() -> Result<TctiNameConf> {
        if let Ok(conf) = TctiNameConf::from_environment_variable() {
            return Ok(conf);
        }
        let device = if Path::new("/dev/tpmrm0").exists() {
            "/dev/tpmrm0"
        } else {
            "/dev/tpm0"
        };
        DeviceConfig::from_str(device)
            .map(TctiNameConf::Device)
            .map_err(|e| HsmError::NotAvailable(format!("invalid TPM device config: {e}")))
    }

    fn open_context() -> Result<Context> {
        Context::new(tcti()?)
            .map_err(|e| HsmError::NotAvailable(format!("cannot reach the TPM: {e}")))
    }

    /// Whether a TPM answers a trivial capability query.
    pub fn available() -> bool {
        let Ok(mut ctx) = open_context() else {
            return false;
        };
        ctx.get_capability(CapabilityType::TpmProperties, TPM2_PT_MANUFACTURER, 1)
            .is_ok()
    }

    /// Bring up a command context and exercise it once.
    pub fn handshake() -> Result<()> {
        let mut ctx = open_context()?;
        ctx.get_capability(CapabilityType::TpmProperties, TPM2_PT_MANUFACTURER, 1)
            .map_err(|e| map_tss(e, Phase::Seal, ""))?;
        Ok(())
    }

    fn response_code(error: &tss_esapi::Error) -> Option<u32> {
        match error {
            tss_esapi::Error::Tss2Error(Tss2ResponseCode::FormatOne(FormatOneResponseCode(
                rc,
            ))) => Some(*rc),
            tss_esapi::Error::Tss2Error(Tss2ResponseCode::FormatZero(FormatZeroResponseCode(
                rc,
            ))) => Some(*rc),
            _ => None,
        }
    }

    /// Map a TPM response code onto the error taxonomy.
    ///
    /// Format-one codes carry parameter/handle indicators in the upper bits;
    /// they are masked down to the bare error number before comparison.
    fn classify(rc: u32, identity: &str) -> Option<HsmError> {
        const RC_FMT1: u32 = 0x080;
        let tpm_rc = rc & 0xFFFF;
        let base = if tpm_rc & RC_FMT1 != 0 {
            tpm_rc & 0x0BF
        } else {
            tpm_rc & 0x0FFF
        };

        match base {
            TPM2_RC_POLICY_FAIL | TPM2_RC_PCR_CHANGED | TPM2_RC_PCR => Some(HsmError::PcrMismatch),
            TPM2_RC_AUTH_FAIL | TPM2_RC_BAD_AUTH | TPM2_RC_AUTH_MISSING | TPM2_RC_AUTH_TYPE
            | TPM2_RC_AUTH_CONTEXT | TPM2_RC_AUTH_UNAVAILABLE => Some(HsmError::AuthFailed(
                format!("TPM response code {rc:#010x}"),
            )),
            TPM2_RC_LOCALITY | TPM2_RC_HIERARCHY | TPM2_RC_NV_AUTHORIZATION
            | TPM2_RC_COMMAND_CODE | TPM2_RC_DISABLED => Some(HsmError::Permission(format!(
                "TPM response code {rc:#010x}"
            ))),
            TPM2_RC_MEMORY | TPM2_RC_OBJECT_MEMORY | TPM2_RC_SESSION_MEMORY
            | TPM2_RC_OBJECT_HANDLES | TPM2_RC_SESSION_HANDLES => Some(HsmError::Memory(format!(
                "TPM response code {rc:#010x}"
            ))),
            TPM2_RC_RETRY | TPM2_RC_YIELDED | TPM2_RC_CANCELED => Some(HsmError::Timeout(
                format!("TPM response code {rc:#010x}"),
            )),
            TPM2_RC_HANDLE | TPM2_RC_REFERENCE_H0 | TPM2_RC_REFERENCE_H1
            | TPM2_RC_REFERENCE_H2 => Some(HsmError::NotFound(identity.to_string())),
            TPM2_RC_INITIALIZE | TPM2_RC_NOT_USED | TPM2_RC_UPGRADE => Some(
                HsmError::NotAvailable(format!("TPM response code {rc:#010x}")),
            ),
            _ => None,
        }
    }

    fn map_tss(error: tss_esapi::Error, phase: Phase, identity: &str) -> HsmError {
        let mapped = match response_code(&error) {
            Some(rc) => {
                let mapped = classify(rc, identity).unwrap_or_else(|| match phase {
                    Phase::Seal => HsmError::SealFailed(format!("TPM response code {rc:#010x}")),
                    Phase::Unseal => {
                        HsmError::UnsealFailed(format!("TPM response code {rc:#010x}"))
                    }
                    Phase::UnsealPolicy => HsmError::PcrMismatch,
                });
                tracing::debug!(
                    rc = format_args!("{rc:#010x}"),
                    kind = mapped.kind(),
                    "mapped TPM response code"
                );
                mapped
            }
            None => match phase {
                Phase::Seal => HsmError::SealFailed(error.to_string()),
                Phase::Unseal | Phase::UnsealPolicy => HsmError::UnsealFailed(error.to_string()),
            },
        };
        mapped
    }

    fn pcr_slot(index: u8) -> Option<PcrSlot> {
        Some(match index {
            0 => PcrSlot::Slot0,
            1 => PcrSlot::Slot1,
            2 => PcrSlot::Slot2,
            3 => PcrSlot::Slot3,
            4 => PcrSlot::Slot4,
            5 => PcrSlot::Slot5,
            6 => PcrSlot::Slot6,
            7 => PcrSlot::Slot7,
            8 => PcrSlot::Slot8,
            9 => PcrSlot::Slot9,
            10 => PcrSlot::Slot10,
            11 => PcrSlot::Slot11,
            12 => PcrSlot::Slot12,
            13 => PcrSlot::Slot13,
            14 => PcrSlot::Slot14,
            15 => PcrSlot::Slot15,
            16 => PcrSlot::Slot16,
            17 => PcrSlot::Slot17,
            18 => PcrSlot::Slot18,
            19 => PcrSlot::Slot19,
            20 => PcrSlot::Slot20,
            21 => PcrSlot::Slot21,
            22 => PcrSlot::Slot22,
            23 => PcrSlot::Slot23,
            _ => return None,
        })
    }

    fn pcr_selection(mask: u32) -> Result<PcrSelectionList> {
        let mut slots = Vec::new();
        for index in 0..24u8 {
            if mask & (1 << index) != 0 {
                slots.push(pcr_slot(index).ok_or_else(|| {
                    HsmError::InvalidIdentity(format!("PCR index {index} out of range"))
                })?);
            }
        }
        if slots.is_empty() {
            return Err(HsmError::InvalidIdentity("PCR selection mask is empty".into()));
        }
        PcrSelectionListBuilder::new()
            .with_selection(HashingAlgorithm::Sha256, &slots)
            .build()
            .map_err(|e| HsmError::Internal(format!("building PCR selection: {e}")))
    }

    /// RSA-2048 restricted decryption primary, AES-128-CFB, SHA-256 name
    /// algorithm, no auth value.
    fn primary_template() -> std::result::Result<Public, tss_esapi::Error> {
        let attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .with_sensitive_data_origin(true)
            .with_user_with_auth(true)
            .with_restricted(true)
            .with_decrypt(true)
            .build()?;

        let rsa_parameters = PublicRsaParametersBuilder::new()
            .with_symmetric(SymmetricDefinitionObject::AES_128_CFB)
            .with_scheme(RsaScheme::Null)
            .with_key_bits(RsaKeyBits::Rsa2048)
            .with_exponent(RsaExponent::default())
            .with_is_decryption_key(true)
            .with_is_signing_key(false)
            .with_restricted(true)
            .build()?;

        PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::Rsa)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_object_attributes(attributes)
            .with_rsa_parameters(rsa_parameters)
            .with_rsa_unique_identifier(Default::default())
            .build()
    }

    /// KeyedHash template for the sealed PIN: fixedTPM + fixedParent, no
    /// scheme, authorization only through the PCR policy digest.
    fn sealed_template(policy_digest: Digest) -> std::result::Result<Public, tss_esapi::Error> {
        let attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .build()?;

        PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::KeyedHash)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_object_attributes(attributes)
            .with_auth_policy(policy_digest)
            .with_keyed_hash_parameters(PublicKeyedHashParameters::new(KeyedHashScheme::Null))
            .with_keyed_hash_unique_identifier(Digest::default())
            .build()
    }

    fn with_ctx<T>(
        ctx: &Arc<Mutex<Context>>,
        f: impl FnOnce(&mut Context) -> std::result::Result<T, tss_esapi::Error>,
    ) -> std::result::Result<T, tss_esapi::Error> {
        let mut ctx = ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut ctx)
    }

    fn track_flush(
        guard: &mut ResourceGuard,
        ctx: &Arc<Mutex<Context>>,
        handle: ObjectHandle,
    ) -> Result<()> {
        let ctx = Arc::clone(ctx);
        guard.track(move || {
            let mut ctx = ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(error) = ctx.flush_context(handle) {
                tracing::debug!(%error, "flushing TPM handle failed");
            }
        })
    }

    fn start_session(
        ctx: &Arc<Mutex<Context>>,
        guard: &mut ResourceGuard,
        session_type: SessionType,
        phase: Phase,
        identity: &str,
    ) -> Result<AuthSession> {
        let session = with_ctx(ctx, |c| {
            c.start_auth_session(
                None,
                None,
                None,
                session_type,
                SymmetricDefinition::AES_128_CFB,
                HashingAlgorithm::Sha256,
            )
        })
        .map_err(|e| map_tss(e, phase, identity))?
        .ok_or_else(|| HsmError::NotInitialized("TPM returned no auth session".into()))?;
        track_flush(guard, ctx, SessionHandle::from(session).into())?;
        Ok(session)
    }

    /// Seal a PIN for `identity`, binding it to the PCR selection in `mask`.
    pub fn seal(dir: &Path, identity: &str, pin: &[u8], mask: u32) -> Result<()> {
        let ctx = Arc::new(Mutex::new(open_context()?));
        let mut guard = ResourceGuard::new();

        let template =
            primary_template().map_err(|e| map_tss(e, Phase::Seal, identity))?;
        let primary = with_ctx(&ctx, |c| {
            c.execute_with_nullauth_session(|c| {
                c.create_primary(Hierarchy::Owner, template, None, None, None, None)
            })
        })
        .map_err(|e| map_tss(e, Phase::Seal, identity))?;
        track_flush(&mut guard, &ctx, primary.key_handle.into())?;

        // Trial session: compute the policy digest without authorizing
        // anything.
        let session = start_session(&ctx, &mut guard, SessionType::Trial, Phase::Seal, identity)?;
        let policy_session = PolicySession::try_from(session)
            .map_err(|e| HsmError::Internal(format!("trial session conversion: {e}")))?;

        let selection = pcr_selection(mask)?;
        with_ctx(&ctx, |c| {
            c.policy_pcr(policy_session, Digest::default(), selection.clone())
        })
        .map_err(|e| map_tss(e, Phase::Seal, identity))?;
        let policy_digest = with_ctx(&ctx, |c| c.policy_get_digest(policy_session))
            .map_err(|e| map_tss(e, Phase::Seal, identity))?;

        let template =
            sealed_template(policy_digest).map_err(|e| map_tss(e, Phase::Seal, identity))?;
        let sensitive = SensitiveData::try_from(pin.to_vec())
            .map_err(|e| map_tss(e, Phase::Seal, identity))?;
        let created = with_ctx(&ctx, |c| {
            c.execute_with_nullauth_session(|c| {
                c.create(primary.key_handle, template, None, Some(sensitive), None, None)
            })
        })
        .map_err(|e| map_tss(e, Phase::Seal, identity))?;

        let blob = SealedBlob {
            public: created
                .out_public
                .marshall()
                .map_err(|e| map_tss(e, Phase::Seal, identity))?,
            private: created.out_private.to_vec(),
        };
        persist(dir, identity, &blob)
    }

    /// Unseal the PIN for `identity` under a live PCR policy session.
    pub fn unseal(dir: &Path, identity: &str, mask: u32) -> Result<SecretBuffer> {
        let blob = load(dir, identity)?;
        let public = Public::unmarshall(&blob.public)
            .map_err(|e| map_tss(e, Phase::Unseal, identity))?;
        let private = Private::try_from(blob.private.clone())
            .map_err(|e| map_tss(e, Phase::Unseal, identity))?;

        let ctx = Arc::new(Mutex::new(open_context()?));
        let mut guard = ResourceGuard::new();

        let template =
            primary_template().map_err(|e| map_tss(e, Phase::Unseal, identity))?;
        let primary = with_ctx(&ctx, |c| {
            c.execute_with_nullauth_session(|c| {
                c.create_primary(Hierarchy::Owner, template, None, None, None, None)
            })
        })
        .map_err(|e| map_tss(e, Phase::Unseal, identity))?;
        track_flush(&mut guard, &ctx, primary.key_handle.into())?;

        let object = with_ctx(&ctx, |c| {
            c.execute_with_nullauth_session(|c| c.load(primary.key_handle, private, public))
        })
        .map_err(|e| map_tss(e, Phase::Unseal, identity))?;
        track_flush(&mut guard, &ctx, object.into())?;

        let session =
            start_session(&ctx, &mut guard, SessionType::Policy, Phase::Unseal, identity)?;
        let policy_session = PolicySession::try_from(session)
            .map_err(|e| HsmError::Internal(format!("policy session conversion: {e}")))?;

        // Replays the PCR assertion against live values.
        let selection = pcr_selection(mask)?;
        with_ctx(&ctx, |c| {
            c.policy_pcr(policy_session, Digest::default(), selection)
        })
        .map_err(|e| map_tss(e, Phase::UnsealPolicy, identity))?;

        let sensitive = with_ctx(&ctx, |c| {
            c.execute_with_session(Some(session), |c| c.unseal(object.into()))
        })
        .map_err(|e| map_tss(e, Phase::UnsealPolicy, identity))?;

        Ok(SecretBuffer::from_vec(sensitive.to_vec()))
    }

    /// Manufacturer and firmware facts for the status descriptor.
    pub fn facts() -> Result<TpmFacts> {
        let mut ctx = open_context()?;
        let (capabilities, _more) = ctx
            .get_capability(CapabilityType::TpmProperties, TPM2_PT_MANUFACTURER, 32)
            .map_err(|e| map_tss(e, Phase::Seal, ""))?;

        let mut manufacturer_raw = 0u32;
        let mut firmware_1 = 0u32;
        let mut firmware_2 = 0u32;
        if let CapabilityData::TpmProperties(properties) = capabilities {
            for property in properties.iter() {
                let tag: u32 = property.property().into();
                if tag == TPM2_PT_MANUFACTURER {
                    manufacturer_raw = property.value();
                } else if tag == TPM2_PT_FIRMWARE_VERSION_1 {
                    firmware_1 = property.value();
                } else if tag == TPM2_PT_FIRMWARE_VERSION_2 {
                    firmware_2 = property.value();
                }
            }
        }

        let manufacturer = String::from_utf8_lossy(&manufacturer_raw.to_be_bytes())
            .trim_end_matches('\0')
            .to_string();
        let firmware_version = format!(
            "{}.{}.{}.{}",
            (firmware_1 >> 16) & 0xFFFF,
            firmware_1 & 0xFFFF,
            (firmware_2 >> 16) & 0xFFFF,
            firmware_2 & 0xFFFF,
        );

        Ok(TpmFacts {
            manufacturer,
            firmware_version,
        })
    }

}
