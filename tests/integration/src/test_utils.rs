//! Fixtures for the sealing scenarios.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pinseal_hsm::{HsmService, MemoryStore, SoftwareElement};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Unique naming prefix so concurrent tests never share artifacts.
pub fn unique_prefix(tag: &str) -> String {
    format!(
        "com.pinseal.test.{tag}.{}",
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// Service backed by a fresh in-process credential store.
pub fn fallback_service(tag: &str) -> HsmService {
    HsmService::builder()
        .prefix(unique_prefix(tag))
        .secret_store(Arc::new(MemoryStore::new()))
        .build()
}

/// Service backed by a fresh software element.
pub fn element_service(tag: &str) -> HsmService {
    element_service_with(tag, SoftwareElement::new())
}

/// Service backed by the given software element.
pub fn element_service_with(tag: &str, element: SoftwareElement) -> HsmService {
    HsmService::builder()
        .prefix(unique_prefix(tag))
        .secret_store(Arc::new(MemoryStore::new()))
        .element_provider(Arc::new(element))
        .build()
}

/// Collect the bytes an unseal delivers.
pub fn unseal_to_vec(service: &HsmService, identity: &str) -> pinseal_hsm::Result<Vec<u8>> {
    let mut delivered = Vec::new();
    service.unseal_pin(identity, |pin| {
        delivered.extend_from_slice(pin);
        0
    })?;
    Ok(delivered)
}
