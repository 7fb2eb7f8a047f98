//! NDJSON framing for the editor's JSON-RPC stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! runaway or malicious peer cannot make the relay buffer an unbounded frame.
//!
//! # Usage
//!
//! [`NdjsonCodec`] is the codec parameter for
//! [`tokio_util::codec::FramedRead`] over the relay's stdin. Outbound frames
//! are written by [`crate::acp::writer::run_writer`], which produces the same
//! `\n`-delimited framing without going through the encoder.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted frame length: 1 MiB.
///
/// Inbound lines over this limit make [`NdjsonCodec::decode`] return
/// [`AppError::Protocol`] with `"line too long"` instead of allocating.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited JSON codec.
///
/// Each `\n`-terminated UTF-8 line is one complete JSON-RPC frame.
///
/// # Decoder
///
/// Inbound lines longer than [`MAX_LINE_BYTES`] decode to
/// [`AppError::Protocol`]`("line too long: …")`; the codec then discards the
/// rest of that line and resumes at the next newline. I/O errors map to
/// [`AppError::Io`].
///
/// # Encoder
///
/// Strings are encoded as `item\n`. The length limit is not applied on the
/// way out.
///
/// # Examples
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use agent_relay::acp::codec::NdjsonCodec;
///
/// let frames = FramedRead::new(tokio::io::stdin(), NdjsonCodec::new());
/// ```
#[derive(Debug)]
pub struct NdjsonCodec(LinesCodec);

impl NdjsonCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds only a partial line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol("line too long: …")` once the pending line
    /// exceeds [`MAX_LINE_BYTES`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode whatever is left when the editor closes the stream.
    ///
    /// # Errors
    ///
    /// Same as [`NdjsonCodec::decode`].
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = AppError;

    /// Append `item` and a trailing `\n` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

// ── Private helper ──────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
