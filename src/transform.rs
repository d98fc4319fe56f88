//! In-memory codec streams: a transform is simultaneously the write side
//! (byte consumer) and the read side (byte producer). Writing appends to
//! an internal growable staging buffer; reading drains encoded/decoded
//! output. Base64 and Deflate/Inflate are the two concrete realizations;
//! both the raw algorithms are collaborators this crate consumes from
//! `base64` and `flate2` rather than reimplementing (spec §1, §6).

use crate::error::{ErrorCode, Result};
use crate::stream::{Stream, StreamType};
use base64::alphabet::{STANDARD, URL_SAFE};
use base64::engine::{general_purpose::GeneralPurposeConfig, GeneralPurpose};
use base64::engine::general_purpose::NO_PAD;
use base64::Engine as _;
use bitflags::bitflags;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::collections::VecDeque;

bitflags! {
    /// Flags passed to [`Transform::flush`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlushFlags: u32 {
        /// Signals end-of-input: the codec may emit trailing bytes and then
        /// report [`ErrorCode::Eof`] once they're drained.
        const FLUSH_EOF = 0x01;
    }
}

/// A stream that also encodes/decodes: writes on one end emerge encoded (or
/// decoded) on the other.
pub trait Transform: Stream {
    fn flush(&mut self, flags: FlushFlags) -> Result<()>;
}

/// Which 6-bit alphabet a [`Base64Transform`] uses. The padding symbol (`=`)
/// is shared by both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base64Alphabet {
    Standard,
    UrlSafe,
}

/// Whether a [`Base64Transform`] decoder tolerates bytes outside the
/// alphabet (besides whitespace, which is always ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GarbagePolicy {
    Reject,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Base64Mode {
    Encode,
    Decode(GarbagePolicy),
}

/// Base64 encoder/decoder realized as a [`Transform`].
#[derive(Debug)]
pub struct Base64Transform {
    alphabet: Base64Alphabet,
    mode: Base64Mode,
    input: Vec<u8>,
    output: VecDeque<u8>,
    eof_signaled: bool,
    eof_reported: bool,
}

fn engine_for(alphabet: Base64Alphabet) -> GeneralPurpose {
    let alpha = match alphabet {
        Base64Alphabet::Standard => STANDARD,
        Base64Alphabet::UrlSafe => URL_SAFE,
    };
    GeneralPurpose::new(&alpha, GeneralPurposeConfig::new().with_encode_padding(true))
}

fn engine_no_pad(alphabet: Base64Alphabet) -> GeneralPurpose {
    let alpha = match alphabet {
        Base64Alphabet::Standard => STANDARD,
        Base64Alphabet::UrlSafe => URL_SAFE,
    };
    GeneralPurpose::new(&alpha, NO_PAD)
}

impl Base64Transform {
    pub fn encoder(alphabet: Base64Alphabet) -> Self {
        Base64Transform {
            alphabet,
            mode: Base64Mode::Encode,
            input: Vec::new(),
            output: VecDeque::new(),
            eof_signaled: false,
            eof_reported: false,
        }
    }

    pub fn decoder(alphabet: Base64Alphabet, garbage: GarbagePolicy) -> Self {
        Base64Transform {
            alphabet,
            mode: Base64Mode::Decode(garbage),
            input: Vec::new(),
            output: VecDeque::new(),
            eof_signaled: false,
            eof_reported: false,
        }
    }

    fn drain_encode(&mut self, final_flush: bool) -> Result<()> {
        let take = if final_flush {
            self.input.len()
        } else {
            self.input.len() - (self.input.len() % 3)
        };
        if take == 0 {
            return Ok(());
        }
        let chunk: Vec<u8> = self.input.drain(..take).collect();
        let engine = engine_for(self.alphabet);
        let encoded = engine.encode(&chunk);
        self.output.extend(encoded.into_bytes());
        Ok(())
    }

    fn drain_decode(&mut self, garbage: GarbagePolicy, final_flush: bool) -> Result<()> {
        // Filter whitespace (always ignored) and, if requested, any other
        // non-alphabet byte. A stray '=' mid-stream is an error; padding is
        // only meaningful at the very end of the input.
        let alphabet_bytes: &[u8] = match self.alphabet {
            Base64Alphabet::Standard => {
                b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/"
            }
            Base64Alphabet::UrlSafe => {
                b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_"
            }
        };

        let mut symbols = Vec::with_capacity(self.input.len());
        let mut pad_count = 0usize;
        for &b in &self.input {
            if b.is_ascii_whitespace() {
                continue;
            }
            if b == b'=' {
                pad_count += 1;
                continue;
            }
            if pad_count > 0 {
                // a stray '=' followed by more data mid-stream
                return Err(ErrorCode::BadArg);
            }
            if alphabet_bytes.contains(&b) {
                symbols.push(b);
            } else if garbage == GarbagePolicy::Ignore {
                continue;
            } else {
                return Err(ErrorCode::BadArg);
            }
        }

        if !final_flush {
            // Keep the trailing partial group (< 4 symbols) buffered; only
            // decode whole groups now.
            let whole = symbols.len() - (symbols.len() % 4);
            if whole == 0 {
                return Ok(());
            }
            let engine = engine_no_pad(self.alphabet);
            let decoded = engine
                .decode(&symbols[..whole])
                .map_err(|_| ErrorCode::BadArg)?;
            self.output.extend(decoded);
            // Put back whatever wasn't consumed, re-deriving the raw
            // remainder is unnecessary: we already stripped whitespace and
            // padding above, so just retain the unconsumed tail bytes.
            let remainder: Vec<u8> = symbols[whole..].to_vec();
            self.input = remainder;
            return Ok(());
        }

        if symbols.len() % 4 == 1 {
            return Err(ErrorCode::BadArg);
        }

        let engine = engine_no_pad(self.alphabet);
        let decoded = engine.decode(&symbols).map_err(|_| ErrorCode::BadArg)?;
        self.output.extend(decoded);
        self.input.clear();
        Ok(())
    }
}

impl Stream for Base64Transform {
    fn stream_type(&self) -> StreamType {
        StreamType::Transform
    }

    fn set_timeout(&mut self, _ms: u32) {
        // In-memory; nothing to wait on.
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.output.is_empty() {
            if self.eof_signaled {
                self.eof_reported = true;
                return Err(ErrorCode::Eof);
            }
            return Err(ErrorCode::Timeout);
        }
        let n = buf.len().min(self.output.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.output.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.eof_signaled {
            return Err(ErrorCode::Closed);
        }
        self.input.extend_from_slice(buf);
        match self.mode {
            Base64Mode::Encode => self.drain_encode(false)?,
            Base64Mode::Decode(policy) => self.drain_decode(policy, false)?,
        }
        Ok(buf.len())
    }

    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Transform for Base64Transform {
    fn flush(&mut self, flags: FlushFlags) -> Result<()> {
        if flags.contains(FlushFlags::FLUSH_EOF) {
            match self.mode {
                Base64Mode::Encode => self.drain_encode(true)?,
                Base64Mode::Decode(policy) => self.drain_decode(policy, true)?,
            }
            self.eof_signaled = true;
        }
        Ok(())
    }
}

/// Speed/ratio hint for [`DeflateTransform::compressor`], mapping to the
/// underlying zlib-compatible codec's presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionHint {
    Fast,
    Balanced,
    Good,
}

impl From<CompressionHint> for Compression {
    fn from(hint: CompressionHint) -> Self {
        match hint {
            CompressionHint::Fast => Compression::fast(),
            CompressionHint::Balanced => Compression::default(),
            CompressionHint::Good => Compression::best(),
        }
    }
}

enum Codec {
    Compress(Box<Compress>),
    Decompress(Box<Decompress>),
}

/// Deflate/Inflate realized as a [`Transform`], zlib-wrapped (the raw
/// deflate variant is not used, per spec §6 wire formats).
///
/// Flush strategy: `SYNC_FLUSH` on every `flush` call until `FLUSH_EOF` is
/// given, at which point `FINISH` is used — matching the original's
/// default (spec §9's "open question"), chosen so partial writes become
/// visible to a reader without waiting for the whole stream.
pub struct DeflateTransform {
    codec: Codec,
    input: VecDeque<u8>,
    output: VecDeque<u8>,
    eof_signaled: bool,
    scratch: Vec<u8>,
}

impl std::fmt::Debug for DeflateTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateTransform").finish_non_exhaustive()
    }
}

const SCRATCH_SIZE: usize = 64 * 1024;

impl DeflateTransform {
    pub fn compressor(hint: CompressionHint) -> Self {
        DeflateTransform {
            codec: Codec::Compress(Box::new(Compress::new(hint.into(), true))),
            input: VecDeque::new(),
            output: VecDeque::new(),
            eof_signaled: false,
            scratch: vec![0u8; SCRATCH_SIZE],
        }
    }

    pub fn decompressor() -> Self {
        DeflateTransform {
            codec: Codec::Decompress(Box::new(Decompress::new(true))),
            input: VecDeque::new(),
            output: VecDeque::new(),
            eof_signaled: false,
            scratch: vec![0u8; SCRATCH_SIZE],
        }
    }

    fn pump(&mut self, finish: bool) -> Result<()> {
        loop {
            let (before_in, before_out) = match &self.codec {
                Codec::Compress(c) => (c.total_in(), c.total_out()),
                Codec::Decompress(d) => (d.total_in(), d.total_out()),
            };

            let (input_contig, _) = self.input.as_slices();
            let status = match &mut self.codec {
                Codec::Compress(c) => {
                    let flush = if finish {
                        FlushCompress::Finish
                    } else {
                        FlushCompress::Sync
                    };
                    c.compress(input_contig, &mut self.scratch, flush)
                        .map_err(|_| ErrorCode::Internal)?
                }
                Codec::Decompress(d) => {
                    let flush = if finish {
                        FlushDecompress::Finish
                    } else {
                        FlushDecompress::Sync
                    };
                    d.decompress(input_contig, &mut self.scratch, flush)
                        .map_err(|_| ErrorCode::BadArg)?
                }
            };

            let (after_in, after_out) = match &self.codec {
                Codec::Compress(c) => (c.total_in(), c.total_out()),
                Codec::Decompress(d) => (d.total_in(), d.total_out()),
            };

            let consumed = (after_in - before_in) as usize;
            for _ in 0..consumed {
                self.input.pop_front();
            }
            let produced = (after_out - before_out) as usize;
            self.output.extend(&self.scratch[..produced]);

            let done = matches!(status, Status::StreamEnd) || (consumed == 0 && produced == 0);
            if done {
                return Ok(());
            }
        }
    }
}

impl Stream for DeflateTransform {
    fn stream_type(&self) -> StreamType {
        StreamType::Transform
    }

    fn set_timeout(&mut self, _ms: u32) {}

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.output.is_empty() {
            if self.eof_signaled {
                return Err(ErrorCode::Eof);
            }
            return Err(ErrorCode::Timeout);
        }
        let n = buf.len().min(self.output.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.output.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.eof_signaled {
            return Err(ErrorCode::Closed);
        }
        self.input.extend(buf);
        self.pump(false)?;
        Ok(buf.len())
    }

    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Transform for DeflateTransform {
    fn flush(&mut self, flags: FlushFlags) -> Result<()> {
        if flags.contains(FlushFlags::FLUSH_EOF) {
            self.pump(true)?;
            self.eof_signaled = true;
        } else {
            self.pump(false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base64_roundtrip(data: &[u8], alphabet: Base64Alphabet) -> Vec<u8> {
        let mut enc = Base64Transform::encoder(alphabet);
        enc.write(data).unwrap();
        enc.flush(FlushFlags::FLUSH_EOF).unwrap();
        let mut encoded = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match enc.read(&mut buf) {
                Ok(n) => encoded.extend_from_slice(&buf[..n]),
                Err(ErrorCode::Eof) => break,
                Err(e) => panic!("unexpected: {e:?}"),
            }
        }

        let mut dec = Base64Transform::decoder(alphabet, GarbagePolicy::Reject);
        dec.write(&encoded).unwrap();
        dec.flush(FlushFlags::FLUSH_EOF).unwrap();
        let mut decoded = Vec::new();
        loop {
            match dec.read(&mut buf) {
                Ok(n) => decoded.extend_from_slice(&buf[..n]),
                Err(ErrorCode::Eof) => break,
                Err(e) => panic!("unexpected: {e:?}"),
            }
        }
        decoded
    }

    #[test]
    fn hello_world_vector() {
        let mut enc = Base64Transform::encoder(Base64Alphabet::Standard);
        enc.write(b"Hello, World!").unwrap();
        enc.flush(FlushFlags::FLUSH_EOF).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match enc.read(&mut buf) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ErrorCode::Eof) => break,
                Err(e) => panic!("unexpected: {e:?}"),
            }
        }
        assert_eq!(out, b"SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn decode_of_vector_matches_original() {
        let mut dec = Base64Transform::decoder(Base64Alphabet::Standard, GarbagePolicy::Reject);
        dec.write(b"SGVsbG8sIFdvcmxkIQ==").unwrap();
        dec.flush(FlushFlags::FLUSH_EOF).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match dec.read(&mut buf) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ErrorCode::Eof) => break,
                Err(e) => panic!("unexpected: {e:?}"),
            }
        }
        assert_eq!(out, b"Hello, World!");
    }

    #[test]
    fn stray_padding_mid_stream_is_rejected() {
        let mut dec = Base64Transform::decoder(Base64Alphabet::Standard, GarbagePolicy::Reject);
        dec.write(b"SGVs=G8h").unwrap();
        assert_eq!(
            dec.flush(FlushFlags::FLUSH_EOF).unwrap_err(),
            ErrorCode::BadArg
        );
    }

    #[test]
    fn length_one_mod_four_is_malformed() {
        let mut dec = Base64Transform::decoder(Base64Alphabet::Standard, GarbagePolicy::Reject);
        dec.write(b"SGVsb").unwrap(); // 5 symbols, 5 % 4 == 1
        assert_eq!(
            dec.flush(FlushFlags::FLUSH_EOF).unwrap_err(),
            ErrorCode::BadArg
        );
    }

    #[test]
    fn deflate_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(16);
        let mut enc = DeflateTransform::compressor(CompressionHint::Balanced);
        enc.write(&data).unwrap();
        enc.flush(FlushFlags::FLUSH_EOF).unwrap();
        let mut compressed = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match enc.read(&mut buf) {
                Ok(n) => compressed.extend_from_slice(&buf[..n]),
                Err(ErrorCode::Eof) => break,
                Err(e) => panic!("unexpected: {e:?}"),
            }
        }

        let mut dec = DeflateTransform::decompressor();
        dec.write(&compressed).unwrap();
        dec.flush(FlushFlags::FLUSH_EOF).unwrap();
        let mut out = Vec::new();
        loop {
            match dec.read(&mut buf) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ErrorCode::Eof) => break,
                Err(e) => panic!("unexpected: {e:?}"),
            }
        }
        assert_eq!(out, data);
    }

    proptest! {
        #[test]
        fn base64_roundtrip_standard(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(base64_roundtrip(&data, Base64Alphabet::Standard), data);
        }

        #[test]
        fn base64_roundtrip_url_safe(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(base64_roundtrip(&data, Base64Alphabet::UrlSafe), data);
        }
    }
}
