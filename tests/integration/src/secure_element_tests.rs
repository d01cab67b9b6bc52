//! Dispatcher scenarios against the secure-element backend.

use std::sync::{Arc, Mutex};

use pinseal_hsm::{AuthOutcome, BackendKind, HsmError, SoftwareElement};

use crate::test_utils::{element_service, element_service_with, unseal_to_vec};

#[test]
fn element_outranks_the_fallback_store() {
    let hsm = element_service("rank");
    assert_eq!(hsm.detect(), BackendKind::SecureElement);
}

#[test]
fn element_round_trip() {
    let hsm = element_service("roundtrip");
    hsm.seal_pin("work", b"123456").unwrap();
    assert!(hsm.pin_exists("work").unwrap());
    assert_eq!(unseal_to_vec(&hsm, "work").unwrap(), b"123456");
    hsm.clear_pin("work").unwrap();
    assert!(!hsm.pin_exists("work").unwrap());
}

#[test]
fn element_replace_last_write_wins() {
    let hsm = element_service("replace");
    hsm.seal_pin("x", b"first-pin").unwrap();
    hsm.seal_pin("x", b"second-pin-longer").unwrap();
    assert_eq!(unseal_to_vec(&hsm, "x").unwrap(), b"second-pin-longer");
}

#[test]
fn element_binary_pin_round_trip() {
    let pin = [0x00, 0x01, 0x02, 0xFF, 0xFE, 0x00, 0x42];
    let hsm = element_service("binary");
    hsm.seal_pin("b", &pin).unwrap();
    assert_eq!(unseal_to_vec(&hsm, "b").unwrap(), pin);
}

#[test]
fn cancelled_prompt_surfaces_cancelled_and_keeps_the_artifact() {
    let hsm = element_service_with(
        "cancel",
        SoftwareElement::with_authorizer(|_| AuthOutcome::Cancelled),
    );
    hsm.set_user_presence(true).unwrap();
    hsm.seal_pin("work", b"123456").unwrap();
    assert!(matches!(
        hsm.unseal_pin("work", |_| 0),
        Err(HsmError::Cancelled)
    ));
    assert!(hsm.pin_exists("work").unwrap());
}

#[test]
fn denied_prompt_surfaces_auth_failed() {
    let hsm = element_service_with(
        "denied",
        SoftwareElement::with_authorizer(|_| AuthOutcome::Denied),
    );
    hsm.set_user_presence(true).unwrap();
    hsm.seal_pin("work", b"123456").unwrap();
    assert!(matches!(
        hsm.unseal_pin("work", |_| 0),
        Err(HsmError::AuthFailed(_))
    ));
}

#[test]
fn approved_prompt_delivers_the_pin_and_names_the_identity() {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&prompts);
    let hsm = element_service_with(
        "approved",
        SoftwareElement::with_authorizer(move |reason| {
            seen.lock().unwrap().push(reason.to_string());
            AuthOutcome::Approved
        }),
    );
    hsm.set_user_presence(true).unwrap();
    hsm.seal_pin("work", b"123456").unwrap();
    assert_eq!(unseal_to_vec(&hsm, "work").unwrap(), b"123456");

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("'work'"), "prompt was {:?}", prompts[0]);
}

#[test]
fn pin_exists_never_triggers_the_presence_gate() {
    let hsm = element_service_with(
        "noprompt",
        SoftwareElement::with_authorizer(|_| panic!("presence gate must not run")),
    );
    hsm.set_user_presence(true).unwrap();
    hsm.seal_pin("work", b"123456").unwrap();
    assert!(hsm.pin_exists("work").unwrap());
    let _ = hsm.list_identities().unwrap();
    let _ = hsm.status(Some("work")).unwrap();
}

#[test]
fn presence_requirement_set_after_key_creation_leaves_old_keys_open() {
    let hsm = element_service_with(
        "latched",
        SoftwareElement::with_authorizer(|_| AuthOutcome::Cancelled),
    );
    hsm.seal_pin("work", b"123456").unwrap();
    hsm.set_user_presence(true).unwrap();
    // The key predates the requirement; its access control is unchanged.
    assert_eq!(unseal_to_vec(&hsm, "work").unwrap(), b"123456");
}

#[test]
fn status_reports_element_key_per_identity() {
    let hsm = element_service("status");
    hsm.seal_pin("work", b"123456").unwrap();

    let status = hsm.status(Some("work")).unwrap();
    assert_eq!(status.backend, BackendKind::SecureElement);
    assert_eq!(status.artifact_exists, Some(true));
    assert!(status.secure_element.unwrap().key_exists);

    let status = hsm.status(Some("other")).unwrap();
    assert_eq!(status.artifact_exists, Some(false));
    assert!(!status.secure_element.unwrap().key_exists);
}

#[test]
fn clear_all_removes_artifacts_and_element_keys() {
    let hsm = element_service("clearall");
    for identity in ["a", "b", "c"] {
        hsm.seal_pin(identity, b"123456").unwrap();
    }
    hsm.clear_all().unwrap();
    assert!(hsm.list_identities().unwrap().is_empty());
    for identity in ["a", "b", "c"] {
        assert!(!hsm.status(Some(identity)).unwrap().secure_element.unwrap().key_exists);
    }
}

#[test]
fn element_concurrent_seals_on_distinct_identities() {
    let hsm = Arc::new(element_service("concurrent"));
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let hsm = Arc::clone(&hsm);
            std::thread::spawn(move || {
                let identity = format!("concurrent-{i}");
                hsm.seal_pin(&identity, format!("pin-{i}").as_bytes()).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for i in 0..10 {
        assert_eq!(
            unseal_to_vec(&hsm, &format!("concurrent-{i}")).unwrap(),
            format!("pin-{i}").as_bytes()
        );
    }
}
