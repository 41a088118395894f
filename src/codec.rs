//! Revision codecs: raw text in, compressed bytes plus a tag out.
//!
//! [`Method`] covers the stateless general-purpose compressors. [`DeltaCodec`]
//! encodes a revision against its parent's text and falls back to its
//! configured method when no parent is available. Both operate on the UTF-8
//! bytes of the text and are chosen once, when a pool is built.

use crate::error::CodecError;
use std::fmt;
use std::io::{Read, Write};

/// Compression strategy run by a pool worker.
pub trait Codec: Send + Sync + 'static {
    /// Whether [`Codec::compress`] makes use of the parent revision's text.
    fn uses_parent(&self) -> bool {
        false
    }

    fn compress(&self, text: &str, parent: Option<&str>) -> Result<CompressedPayload, CodecError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    None,
    Gzip,
    Bzip2,
    Lzma2,
}

/// Identifies how a payload was produced, and therefore how to restore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecTag {
    pub method: Method,
    pub delta: bool,
}

impl CodecTag {
    pub const NONE: CodecTag = CodecTag::plain(Method::None);

    pub const fn plain(method: Method) -> Self {
        CodecTag {
            method,
            delta: false,
        }
    }
}

impl fmt::Display for CodecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.delta {
            f.write_str("DELTA+")?;
        }
        f.write_str(match self.method {
            Method::None => "NONE",
            Method::Gzip => "GZIP",
            Method::Bzip2 => "BZIP2",
            Method::Lzma2 => "LZMA2",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPayload {
    pub bytes: Vec<u8>,
    pub tag: CodecTag,
}

impl Method {
    pub fn compress_bytes(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        let bytes = match self {
            Method::None => raw.to_vec(),
            Method::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::with_capacity(raw.len() / 2),
                    flate2::Compression::default(),
                );
                encoder.write_all(raw)?;
                encoder.finish()?
            }
            Method::Bzip2 => {
                let mut encoder = bzip2::write::BzEncoder::new(
                    Vec::with_capacity(raw.len() / 2),
                    bzip2::Compression::default(),
                );
                encoder.write_all(raw)?;
                encoder.finish()?
            }
            Method::Lzma2 => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::with_capacity(raw.len() / 2), 6);
                encoder.write_all(raw)?;
                encoder.finish()?
            }
        };
        Ok(bytes)
    }

    pub fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(bytes.len() * 3);
        match self {
            Method::None => out.extend_from_slice(bytes),
            Method::Gzip => {
                flate2::read::GzDecoder::new(bytes).read_to_end(&mut out)?;
            }
            Method::Bzip2 => {
                bzip2::read::BzDecoder::new(bytes).read_to_end(&mut out)?;
            }
            Method::Lzma2 => {
                xz2::read::XzDecoder::new(bytes).read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

impl Codec for Method {
    fn compress(&self, text: &str, _parent: Option<&str>) -> Result<CompressedPayload, CodecError> {
        Ok(CompressedPayload {
            bytes: self.compress_bytes(text.as_bytes())?,
            tag: CodecTag::plain(*self),
        })
    }
}

/// Parent-relative codec.
///
/// The payload is `varint(prefix) varint(suffix) middle`, where prefix and
/// suffix are the byte runs shared with the parent text, compressed with
/// `fallback`. Without a parent the revision is compressed by `fallback` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaCodec {
    pub fallback: Method,
}

impl DeltaCodec {
    pub fn new(fallback: Method) -> Self {
        Self { fallback }
    }
}

impl Codec for DeltaCodec {
    fn uses_parent(&self) -> bool {
        true
    }

    fn compress(&self, text: &str, parent: Option<&str>) -> Result<CompressedPayload, CodecError> {
        let Some(parent) = parent else {
            return self.fallback.compress(text, None);
        };
        let encoded = encode_delta(parent.as_bytes(), text.as_bytes());
        Ok(CompressedPayload {
            bytes: self.fallback.compress_bytes(&encoded)?,
            tag: CodecTag {
                method: self.fallback,
                delta: true,
            },
        })
    }
}

/// Restores the UTF-8 bytes of a revision. `parent` is only consulted for
/// delta payloads.
pub fn decompress(payload: &CompressedPayload, parent: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let raw = payload.tag.method.decompress(&payload.bytes)?;
    if !payload.tag.delta {
        return Ok(raw);
    }
    let parent = parent.ok_or(CodecError::MissingParent)?;
    decode_delta(parent, &raw)
}

fn encode_delta(parent: &[u8], text: &[u8]) -> Vec<u8> {
    let prefix = parent
        .iter()
        .zip(text)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = parent.len().min(text.len()) - prefix;
    let suffix = parent
        .iter()
        .rev()
        .zip(text.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let middle = &text[prefix..text.len() - suffix];
    let mut out = Vec::with_capacity(middle.len() + 20);
    write_varint(&mut out, prefix as u64);
    write_varint(&mut out, suffix as u64);
    out.extend_from_slice(middle);
    out
}

fn decode_delta(parent: &[u8], encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut cursor = encoded;
    let prefix = read_varint(&mut cursor)? as usize;
    let suffix = read_varint(&mut cursor)? as usize;
    if prefix
        .checked_add(suffix)
        .is_none_or(|shared| shared > parent.len())
    {
        return Err(CodecError::CorruptDelta("shared runs exceed parent length"));
    }

    let mut out = Vec::with_capacity(prefix + cursor.len() + suffix);
    out.extend_from_slice(&parent[..prefix]);
    out.extend_from_slice(cursor);
    out.extend_from_slice(&parent[parent.len() - suffix..]);
    Ok(out)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_varint(input: &mut &[u8]) -> Result<u64, CodecError> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let (&byte, rest) = input
            .split_first()
            .ok_or(CodecError::CorruptDelta("truncated length"))?;
        *input = rest;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::CorruptDelta("length overflows u64"))
}
