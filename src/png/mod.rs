// src/png/mod.rs
// PNG ancillary chunk codec. The PNGine chunk id is `pNGb`: ancillary
// (lowercase first), public-style (uppercase second), reserved (uppercase
// third), safe-to-copy (lowercase fourth). Chunk body is a one-byte
// version, a one-byte flag set (bit 0: gzip), then the PNGB payload.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::PngError;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// The PNGine chunk type. Chosen once; never change it.
pub const CHUNK_TYPE: [u8; 4] = *b"pNGb";

pub const CHUNK_VERSION: u8 = 0x01;
pub const FLAG_GZIP: u8 = 0x01;

/// Decompressed payloads above this are rejected.
pub const MAX_PAYLOAD: usize = 16 << 20;

/// Compress only when it pays: raw payloads of 256 bytes or fewer stay
/// raw, and gzip must land under 90% of the raw size.
const COMPRESS_THRESHOLD: usize = 256;

/// Insert a PNGine chunk carrying `payload` immediately before IEND.
/// Any existing PNGine chunk is left in place; callers that re-embed
/// should strip first (see [`strip`]).
pub fn embed(png: &[u8], payload: &[u8]) -> Result<Vec<u8>, PngError> {
    if png.len() < PNG_SIGNATURE.len() || png[..8] != PNG_SIGNATURE {
        return Err(PngError::InvalidSignature);
    }

    // 8-byte IEND marker: zero length field followed by the type.
    let marker: [u8; 8] = [0, 0, 0, 0, b'I', b'E', b'N', b'D'];
    let iend = png
        .windows(8)
        .position(|w| w == marker)
        .ok_or(PngError::Truncated(png.len()))?;

    let (flags, body_payload) = compress_policy(payload);
    let mut body = Vec::with_capacity(2 + body_payload.len());
    body.push(CHUNK_VERSION);
    body.push(flags);
    body.extend_from_slice(&body_payload);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&CHUNK_TYPE);
    hasher.update(&body);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(png.len() + body.len() + 12);
    out.extend_from_slice(&png[..iend]);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&CHUNK_TYPE);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&png[iend..]);
    Ok(out)
}

/// Find the PNGine chunk and return its (decompressed) PNGB payload.
pub fn extract(png: &[u8]) -> Result<Vec<u8>, PngError> {
    for_each_chunk(png, |chunk_type, body, crc_stored, crc_computed| {
        if *chunk_type != CHUNK_TYPE {
            // Case is meaning in PNG chunk ids: a near-miss casing is a
            // different chunk and never ours.
            return Ok(None);
        }
        if crc_stored != crc_computed {
            return Err(PngError::CrcMismatch {
                stored: crc_stored,
                computed: crc_computed,
            });
        }
        if body.len() < 2 {
            return Err(PngError::Truncated(0));
        }
        let version = body[0];
        if version != CHUNK_VERSION {
            return Err(PngError::UnsupportedVersion(version));
        }
        let flags = body[1];
        let payload = &body[2..];
        let out = if flags & FLAG_GZIP != 0 {
            gunzip(payload)?
        } else {
            if payload.len() > MAX_PAYLOAD {
                return Err(PngError::TooLarge { limit: MAX_PAYLOAD });
            }
            payload.to_vec()
        };
        Ok(Some(out))
    })?
    .ok_or(PngError::MissingChunk)
}

/// Remove every PNGine chunk from `png`.
pub fn strip(png: &[u8]) -> Result<Vec<u8>, PngError> {
    if png.len() < 8 || png[..8] != PNG_SIGNATURE {
        return Err(PngError::InvalidSignature);
    }
    let mut out = Vec::with_capacity(png.len());
    out.extend_from_slice(&png[..8]);
    let mut pos = 8usize;
    while pos < png.len() {
        if png.len() - pos < 12 {
            return Err(PngError::Truncated(pos));
        }
        let len = u32::from_be_bytes(png[pos..pos + 4].try_into().unwrap()) as usize;
        let total = 12 + len;
        if png.len() - pos < total {
            return Err(PngError::Truncated(pos));
        }
        let chunk_type: [u8; 4] = png[pos + 4..pos + 8].try_into().unwrap();
        if chunk_type != CHUNK_TYPE {
            out.extend_from_slice(&png[pos..pos + total]);
        }
        pos += total;
    }
    Ok(out)
}

fn for_each_chunk<T>(
    png: &[u8],
    mut f: impl FnMut(&[u8; 4], &[u8], u32, u32) -> Result<Option<T>, PngError>,
) -> Result<Option<T>, PngError> {
    if png.len() < 8 || png[..8] != PNG_SIGNATURE {
        return Err(PngError::InvalidSignature);
    }
    let mut pos = 8usize;
    while pos < png.len() {
        if png.len() - pos < 12 {
            return Err(PngError::Truncated(pos));
        }
        let len = u32::from_be_bytes(png[pos..pos + 4].try_into().unwrap()) as usize;
        if png.len() - pos < 12 + len {
            return Err(PngError::Truncated(pos));
        }
        let chunk_type: &[u8; 4] = png[pos + 4..pos + 8].try_into().unwrap();
        let body = &png[pos + 8..pos + 8 + len];
        let crc_stored = u32::from_be_bytes(png[pos + 8 + len..pos + 12 + len].try_into().unwrap());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(chunk_type);
        hasher.update(body);
        let crc_computed = hasher.finalize();
        if let Some(v) = f(chunk_type, body, crc_stored, crc_computed)? {
            return Ok(Some(v));
        }
        pos += 12 + len;
    }
    Ok(None)
}

fn compress_policy(payload: &[u8]) -> (u8, Vec<u8>) {
    if payload.len() > COMPRESS_THRESHOLD {
        let gz = gzip(payload);
        // strictly under 90% of raw, else the chunk stays raw
        if gz.len() * 10 < payload.len() * 9 {
            log::debug!(
                "pNGb chunk: gzip {} -> {} bytes",
                payload.len(),
                gz.len()
            );
            return (FLAG_GZIP, gz);
        }
    }
    log::debug!("pNGb chunk: raw {} bytes", payload.len());
    (0, payload.to_vec())
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes).expect("in-memory gzip");
    enc.finish().expect("in-memory gzip")
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, PngError> {
    let mut out = Vec::new();
    let mut dec = GzDecoder::new(bytes).take((MAX_PAYLOAD + 1) as u64);
    dec.read_to_end(&mut out)
        .map_err(|e| PngError::Decompress(e.to_string()))?;
    if out.len() > MAX_PAYLOAD {
        return Err(PngError::TooLarge { limit: MAX_PAYLOAD });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smallest useful host: a 1x1 grayscale PNG written by hand.
    fn tiny_png() -> Vec<u8> {
        fn chunk(ty: &[u8; 4], body: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            out.extend_from_slice(ty);
            out.extend_from_slice(body);
            let mut h = crc32fast::Hasher::new();
            h.update(ty);
            h.update(body);
            out.extend_from_slice(&h.finalize().to_be_bytes());
            out
        }
        let ihdr = [0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0];
        // one filter byte + one gray pixel, deflated
        let raw = [0u8, 0u8];
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw).unwrap();
        let idat = enc.finish().unwrap();

        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&chunk(b"IHDR", &ihdr));
        png.extend_from_slice(&chunk(b"IDAT", &idat));
        png.extend_from_slice(&chunk(b"IEND", &[]));
        png
    }

    #[test]
    fn embed_extract_round_trip_raw() {
        let payload = vec![7u8; 100];
        let png = embed(&tiny_png(), &payload).unwrap();
        assert_eq!(extract(&png).unwrap(), payload);
    }

    #[test]
    fn embed_extract_round_trip_compressed() {
        // compressible and over the threshold: gets gzipped
        let payload = vec![0u8; 4096];
        let png = embed(&tiny_png(), &payload).unwrap();
        assert_eq!(extract(&png).unwrap(), payload);
    }

    #[test]
    fn exactly_256_bytes_stays_raw() {
        let payload = vec![0u8; 256];
        let (flags, body) = compress_policy(&payload);
        assert_eq!(flags, 0);
        assert_eq!(body, payload);
    }

    #[test]
    fn incompressible_stays_raw() {
        // pseudo-random bytes gzip poorly; the 90% rule keeps them raw
        let payload: Vec<u8> = (0..4096u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let (flags, _) = compress_policy(&payload);
        assert_eq!(flags, 0);
    }

    #[test]
    fn missing_chunk_and_bad_signature() {
        assert!(matches!(extract(&tiny_png()), Err(PngError::MissingChunk)));
        assert!(matches!(extract(b"not a png"), Err(PngError::InvalidSignature)));
    }

    #[test]
    fn wrong_casing_is_not_our_chunk() {
        // embed, then flip the chunk id casing to `PNGb`; the payload must
        // no longer be found
        let payload = vec![3u8; 32];
        let mut png = embed(&tiny_png(), &payload).unwrap();
        let pos = png
            .windows(4)
            .position(|w| w == CHUNK_TYPE)
            .unwrap();
        png[pos] = b'P';
        // fix the CRC so only the casing differs
        let len = u32::from_be_bytes(png[pos - 4..pos].try_into().unwrap()) as usize;
        let mut h = crc32fast::Hasher::new();
        h.update(&png[pos..pos + 4 + len]);
        let crc = h.finalize();
        png[pos + 4 + len..pos + 8 + len].copy_from_slice(&crc.to_be_bytes());
        assert!(matches!(extract(&png), Err(PngError::MissingChunk)));
    }

    #[test]
    fn corrupted_body_fails_crc() {
        let payload = vec![3u8; 64];
        let mut png = embed(&tiny_png(), &payload).unwrap();
        let pos = png.windows(4).position(|w| w == CHUNK_TYPE).unwrap();
        png[pos + 10] ^= 0xFF;
        assert!(matches!(extract(&png), Err(PngError::CrcMismatch { .. })));
    }

    #[test]
    fn strip_removes_our_chunk_only() {
        let host = tiny_png();
        let png = embed(&host, &[1, 2, 3]).unwrap();
        assert_eq!(strip(&png).unwrap(), host);
    }

    #[test]
    fn unsupported_version_rejected() {
        let payload = vec![3u8; 16];
        let mut png = embed(&tiny_png(), &payload).unwrap();
        let pos = png.windows(4).position(|w| w == CHUNK_TYPE).unwrap();
        // body starts right after the type; first byte is the version
        png[pos + 4] = 0x7F;
        let len = u32::from_be_bytes(png[pos - 4..pos].try_into().unwrap()) as usize;
        let mut h = crc32fast::Hasher::new();
        h.update(&png[pos..pos + 4 + len]);
        let crc = h.finalize();
        png[pos + 4 + len..pos + 8 + len].copy_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            extract(&png),
            Err(PngError::UnsupportedVersion(0x7F))
        ));
    }
}
