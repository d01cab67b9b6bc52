//! Heap storage for unsealed secrets with guaranteed zeroization.
//!
//! A [`SecretBuffer`] holds the plaintext PIN for the span of one consumer
//! callback. On drop (success, error return, or unwind) every byte is
//! overwritten through [`zeroize`], which uses volatile writes followed by a
//! compiler fence so the overwrite cannot be elided or reordered away.

use zeroize::Zeroize;

#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of buffers wiped by the destructor. Test instrumentation.
#[cfg(test)]
pub(crate) static WIPE_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Owned sensitive bytes, zeroized before the memory returns to the
/// allocator.
///
/// Callers receive a borrowed view via [`SecretBuffer::expose`] and must not
/// retain it past the buffer's lifetime; the borrow checker enforces this for
/// safe code.
pub struct SecretBuffer {
    buf: Box<[u8]>,
}

impl SecretBuffer {
    /// Copy `bytes` into a fresh buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { buf: Box::from(bytes) }
    }

    /// Take ownership of `bytes`, zeroizing the source allocation so no
    /// second plaintext copy outlives the call.
    pub fn from_vec(mut bytes: Vec<u8>) -> Self {
        let buf: Box<[u8]> = Box::from(&bytes[..]);
        bytes.zeroize();
        Self { buf }
    }

    /// Immutable view of the secret.
    pub fn expose(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn wipe(&mut self) {
        self.buf.zeroize();
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        self.wipe();
        #[cfg(test)]
        WIPE_COUNT.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the contents.
        f.debug_struct("SecretBuffer").field("len", &self.buf.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_exact_bytes() {
        let buffer = SecretBuffer::from_slice(b"123456");
        assert_eq!(buffer.expose(), b"123456");
        assert_eq!(buffer.len(), 6);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn from_vec_zeroizes_the_source() {
        let source = vec![0xAA; 32];
        let buffer = SecretBuffer::from_vec(source);
        assert_eq!(buffer.expose(), &[0xAA; 32][..]);
    }

    #[test]
    fn wipe_overwrites_every_byte_in_place() {
        let mut buffer = SecretBuffer::from_slice(&[0xFF, 0x01, 0x7E]);
        buffer.wipe();
        assert_eq!(buffer.len(), 3);
        assert!(buffer.expose().iter().all(|&b| b == 0));
    }

    #[test]
    fn drop_runs_the_destructor_exactly_once() {
        let before = WIPE_COUNT.load(Ordering::SeqCst);
        drop(SecretBuffer::from_slice(b"secret"));
        let after = WIPE_COUNT.load(Ordering::SeqCst);
        assert!(after > before);
    }

    #[test]
    fn debug_output_hides_contents() {
        let buffer = SecretBuffer::from_slice(b"hunter2");
        let rendered = format!("{buffer:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("len"));
    }
}
