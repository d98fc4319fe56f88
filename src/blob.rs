//! Owned contiguous byte buffer with splice/insert/truncate.
//!
//! `Blob` is a thin, exclusively-owned wrapper over `Vec<u8>`. Rust's `Vec`
//! already gives the invariants spec.md asks for (data pointer non-null iff
//! size > 0, resize either fully succeeds or leaves the blob unchanged on
//! allocation failure being effectively unobservable under Rust's
//! abort-on-OOM policy) — this module only adds the split/cut/insert
//! operations the original C `tl_blob` exposed.

use crate::error::{ErrorCode, Result};

/// An owned, contiguous byte sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob(Vec<u8>);

impl Blob {
    /// Allocates `n` bytes. If `src` is given, the first `n` bytes of `src`
    /// (or fewer, if `src` is shorter) are copied in; otherwise the blob is
    /// zero-filled. `n == 0` yields an empty blob.
    pub fn init(n: usize, src: Option<&[u8]>) -> Self {
        let mut data = vec![0u8; n];
        if let Some(src) = src {
            let len = n.min(src.len());
            data[..len].copy_from_slice(&src[..len]);
        }
        Blob(data)
    }

    /// Wraps an already-owned buffer without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Blob(data)
    }

    /// Number of live bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Grows the blob by `n` bytes. `src = None` leaves the appended region
    /// zero-filled (Rust has no meaningful "uninitialized" `Vec` contents).
    pub fn append_raw(&mut self, src: Option<&[u8]>, n: usize) {
        match src {
            Some(bytes) => self.0.extend_from_slice(&bytes[..n.min(bytes.len())]),
            None => self.0.resize(self.0.len() + n, 0),
        }
    }

    /// Appends the given range of `src` unconditionally.
    pub fn append_range(&mut self, src: &[u8]) {
        self.0.extend_from_slice(src);
    }

    /// Splits `src` at `offset`: `dst` takes `[offset..end]`, `src` is
    /// truncated to `offset`. `offset` is clamped to `src`'s length.
    pub fn split(dst: &mut Blob, src: &mut Blob, offset: usize) {
        let offset = offset.min(src.0.len());
        dst.0 = src.0.split_off(offset);
    }

    /// `dst` receives `len` bytes starting at `offset`; `src` has that range
    /// removed. `len` is clamped to the bytes actually available.
    pub fn cut_range(dst: &mut Blob, src: &mut Blob, offset: usize, len: usize) {
        let offset = offset.min(src.0.len());
        let len = len.min(src.0.len() - offset);
        dst.0 = src.0.drain(offset..offset + len).collect();
    }

    /// Inserts `len` bytes of `src[src_off..]` into `dst` at `dst_off`. Both
    /// offsets are clamped.
    pub fn insert(dst: &mut Blob, dst_off: usize, src: &[u8], src_off: usize, len: usize) {
        let dst_off = dst_off.min(dst.0.len());
        let src_off = src_off.min(src.len());
        let len = len.min(src.len() - src_off);
        dst.0
            .splice(dst_off..dst_off, src[src_off..src_off + len].iter().copied());
    }

    /// Inserts raw (zero-filled, if `src` is `None`) bytes at `dst_off`.
    pub fn insert_raw(&mut self, dst_off: usize, src: Option<&[u8]>, len: usize) {
        let dst_off = dst_off.min(self.0.len());
        match src {
            Some(bytes) => {
                let len = len.min(bytes.len());
                self.0.splice(dst_off..dst_off, bytes[..len].iter().copied());
            }
            None => self.0.splice(dst_off..dst_off, std::iter::repeat(0u8).take(len)),
        }
    }

    /// Removes `len` bytes starting at `offset`, clamped to what's available.
    pub fn remove(&mut self, offset: usize, len: usize) {
        let offset = offset.min(self.0.len());
        let len = len.min(self.0.len() - offset);
        self.0.drain(offset..offset + len);
    }

    /// Shrinks the blob to `len` bytes. No-op if already shorter.
    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Copies `len` bytes starting at `offset` into a new `Blob`. Returns
    /// [`ErrorCode::BadArg`] if the range is out of bounds.
    pub fn copy_range(&self, offset: usize, len: usize) -> Result<Blob> {
        let in_bounds = matches!(offset.checked_add(len), Some(end) if end <= self.0.len());
        if !in_bounds {
            return Err(ErrorCode::BadArg);
        }
        Ok(Blob(self.0[offset..offset + len].to_vec()))
    }
}

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self {
        Blob(v)
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn init_zero_len_is_empty() {
        let b = Blob::init(0, None);
        assert!(b.is_empty());
    }

    #[test]
    fn split_then_append_reconstructs_original() {
        let mut src = Blob::init(0, None);
        src.append_range(b"hello world");
        let original = src.clone();

        let mut dst = Blob::default();
        Blob::split(&mut dst, &mut src, 5);

        let mut rebuilt = src.clone();
        rebuilt.append_range(dst.as_slice());
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn cut_range_removes_from_source() {
        let mut src = Blob::from_vec(b"abcdef".to_vec());
        let mut dst = Blob::default();
        Blob::cut_range(&mut dst, &mut src, 2, 3);
        assert_eq!(dst.as_slice(), b"cde");
        assert_eq!(src.as_slice(), b"abf");
    }

    #[test]
    fn cut_range_clamps_len() {
        let mut src = Blob::from_vec(b"abc".to_vec());
        let mut dst = Blob::default();
        Blob::cut_range(&mut dst, &mut src, 1, 100);
        assert_eq!(dst.as_slice(), b"bc");
        assert_eq!(src.as_slice(), b"a");
    }

    proptest! {
        #[test]
        fn append_then_truncate_preserves_prefix(data in proptest::collection::vec(any::<u8>(), 0..256), cut in 0usize..512) {
            let mut b = Blob::init(0, None);
            b.append_range(&data);
            let expected_len = cut.min(data.len());
            b.truncate(cut);
            prop_assert_eq!(b.len(), expected_len);
            prop_assert_eq!(b.as_slice(), &data[..expected_len]);
        }

        #[test]
        fn split_len_invariant(data in proptest::collection::vec(any::<u8>(), 0..256), offset in 0usize..300) {
            let mut src = Blob::init(0, None);
            src.append_range(&data);
            let total = src.len();
            let mut dst = Blob::default();
            Blob::split(&mut dst, &mut src, offset);
            prop_assert_eq!(src.len() + dst.len(), total);
        }
    }
}
