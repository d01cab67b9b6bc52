//! End-to-end scenarios for the PIN sealing service.
//!
//! The suites run against isolated service instances: each test gets its own
//! credential store (and, for the element suites, its own software element),
//! so suites exercise the dispatcher exactly as an embedding application
//! would without sharing persisted state.

pub mod test_utils;

#[cfg(test)]
mod sealing_tests;

#[cfg(test)]
mod secure_element_tests;
