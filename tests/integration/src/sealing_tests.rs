//! Dispatcher scenarios against the fallback credential-store backend.

use std::sync::Arc;

use pinseal_hsm::{BackendKind, HsmError};

use crate::test_utils::{fallback_service, unseal_to_vec};

#[test]
fn round_trip() {
    let hsm = fallback_service("roundtrip");
    hsm.seal_pin("work", b"123456").unwrap();
    assert!(hsm.pin_exists("work").unwrap());
    assert_eq!(unseal_to_vec(&hsm, "work").unwrap(), b"123456");
    hsm.clear_pin("work").unwrap();
    assert!(!hsm.pin_exists("work").unwrap());
}

#[test]
fn replace_last_write_wins() {
    let hsm = fallback_service("replace");
    hsm.seal_pin("x", b"first-pin").unwrap();
    hsm.seal_pin("x", b"second-pin-longer").unwrap();
    assert_eq!(unseal_to_vec(&hsm, "x").unwrap(), b"second-pin-longer");
}

#[test]
fn rejection_of_invalid_inputs() {
    let hsm = fallback_service("rejection");
    assert!(matches!(
        hsm.seal_pin("bad/name", b"p"),
        Err(HsmError::InvalidIdentity(_))
    ));
    assert!(matches!(
        hsm.seal_pin("ok", b""),
        Err(HsmError::InvalidIdentity(_))
    ));
    assert!(matches!(
        hsm.seal_pin("ok", &[0x31; 257]),
        Err(HsmError::InvalidIdentity(_))
    ));
    // Nothing was stored by the rejected calls.
    assert!(!hsm.pin_exists("ok").unwrap());
    assert!(hsm.list_identities().unwrap().is_empty());
}

#[test]
fn binary_pin_is_preserved_byte_for_byte() {
    let pin = [0x00, 0x01, 0x02, 0xFF, 0xFE, 0x00, 0x42];
    let hsm = fallback_service("binary");
    hsm.seal_pin("b", &pin).unwrap();
    assert_eq!(unseal_to_vec(&hsm, "b").unwrap(), pin);
}

#[test]
fn boundary_pin_lengths_round_trip() {
    let hsm = fallback_service("bounds");
    hsm.seal_pin("one", &[0x7F]).unwrap();
    assert_eq!(unseal_to_vec(&hsm, "one").unwrap(), [0x7F]);
    let max = vec![0xA5; 256];
    hsm.seal_pin("max", &max).unwrap();
    assert_eq!(unseal_to_vec(&hsm, "max").unwrap(), max);
}

#[test]
fn concurrent_seals_on_distinct_identities() {
    let hsm = Arc::new(fallback_service("concurrent"));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let hsm = Arc::clone(&hsm);
            std::thread::spawn(move || {
                let identity = format!("concurrent-{i}");
                let pin = format!("pin-{i}");
                hsm.seal_pin(&identity, pin.as_bytes()).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..10 {
        let identity = format!("concurrent-{i}");
        let expected = format!("pin-{i}");
        assert_eq!(unseal_to_vec(&hsm, &identity).unwrap(), expected.as_bytes());
    }
    assert_eq!(hsm.list_identities().unwrap().len(), 10);
}

#[test]
fn concurrent_replacement_of_one_identity_is_never_torn() {
    let hsm = Arc::new(fallback_service("torn"));
    hsm.seal_pin("shared", b"pin-seed").unwrap();

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let hsm = Arc::clone(&hsm);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    hsm.seal_pin("shared", format!("pin-{i}").as_bytes()).unwrap();
                }
            })
        })
        .collect();

    for _ in 0..50 {
        let delivered = unseal_to_vec(&hsm, "shared").unwrap();
        let text = String::from_utf8(delivered).unwrap();
        assert!(
            text == "pin-seed" || (0..4).any(|i| text == format!("pin-{i}")),
            "torn value {text:?}"
        );
    }
    for writer in writers {
        writer.join().unwrap();
    }
}

#[test]
fn consumer_failure_is_internal_and_artifact_survives() {
    let hsm = fallback_service("consumer");
    hsm.seal_pin("c", b"123456").unwrap();
    assert!(matches!(
        hsm.unseal_pin("c", |_| 1),
        Err(HsmError::Internal(_))
    ));
    assert!(hsm.pin_exists("c").unwrap());
    assert_eq!(unseal_to_vec(&hsm, "c").unwrap(), b"123456");
}

#[test]
fn consumer_runs_exactly_once() {
    let hsm = fallback_service("once");
    hsm.seal_pin("once", b"123456").unwrap();
    let mut calls = 0;
    hsm.unseal_pin("once", |_| {
        calls += 1;
        0
    })
    .unwrap();
    assert_eq!(calls, 1);
}

#[test]
fn cleared_identity_behaves_as_absent() {
    let hsm = fallback_service("cleared");
    hsm.seal_pin("gone", b"123456").unwrap();
    hsm.clear_pin("gone").unwrap();
    assert!(!hsm.pin_exists("gone").unwrap());
    assert!(matches!(
        hsm.unseal_pin("gone", |_| 0),
        Err(HsmError::NotFound(_))
    ));
    assert!(matches!(hsm.clear_pin("gone"), Err(HsmError::NotFound(_))));
}

#[test]
fn unseal_of_unknown_identity_is_not_found() {
    let hsm = fallback_service("unknown");
    assert!(matches!(
        hsm.unseal_pin("never-stored", |_| 0),
        Err(HsmError::NotFound(_))
    ));
}

#[test]
fn list_identities_tracks_the_sealed_set() {
    let hsm = fallback_service("listing");
    for identity in ["work", "personal", "backup"] {
        hsm.seal_pin(identity, b"123456").unwrap();
    }
    let mut identities = hsm.list_identities().unwrap();
    identities.sort();
    assert_eq!(identities, vec!["backup", "personal", "work"]);

    hsm.clear_pin("personal").unwrap();
    let mut identities = hsm.list_identities().unwrap();
    identities.sort();
    assert_eq!(identities, vec!["backup", "work"]);
}

#[test]
fn clear_all_removes_every_artifact() {
    let hsm = fallback_service("clearall");
    for i in 0..5 {
        hsm.seal_pin(&format!("id-{i}"), b"123456").unwrap();
    }
    hsm.clear_all().unwrap();
    assert!(hsm.list_identities().unwrap().is_empty());
    for i in 0..5 {
        assert!(!hsm.pin_exists(&format!("id-{i}")).unwrap());
    }
}

#[test]
fn fallback_backend_detected_and_described() {
    let hsm = fallback_service("detect");
    assert_eq!(hsm.detect(), BackendKind::CredentialStore);
    let status = hsm.status(None).unwrap();
    assert!(status.available);
    assert!(status.description.contains("credential store"));
}

#[test]
fn config_setters_do_not_apply_to_the_fallback() {
    let hsm = fallback_service("config");
    assert!(matches!(
        hsm.set_pcr_binding(1 << 7),
        Err(HsmError::NotAvailable(_))
    ));
    assert!(matches!(
        hsm.set_user_presence(true),
        Err(HsmError::NotAvailable(_))
    ));
}
