//! Content-coding negotiation and one-shot compressors.
//!
//! Negotiation follows `Accept-Encoding` q-value ordering intersected with
//! the server's configured scheme list; compression itself is applied to
//! full bodies only (never to byte-range responses).

use std::io;
use std::io::Write;

use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

/// A compression scheme the server can apply.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl ContentEncoding {
    pub fn token(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Brotli => "br",
            ContentEncoding::Zstd => "zstd",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            t if t.eq_ignore_ascii_case("gzip") => Some(ContentEncoding::Gzip),
            t if t.eq_ignore_ascii_case("deflate") => Some(ContentEncoding::Deflate),
            t if t.eq_ignore_ascii_case("br") => Some(ContentEncoding::Brotli),
            t if t.eq_ignore_ascii_case("zstd") => Some(ContentEncoding::Zstd),
            _ => None,
        }
    }
}

/// One entry of an `Accept-Encoding` header.
#[derive(Debug, Clone, PartialEq)]
struct AcceptEntry {
    token: String,
    q: f32,
    explicit_q: bool,
}

fn parse_accept_encoding(value: &str) -> Vec<AcceptEntry> {
    value
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let mut pieces = part.split(';');
            let token = pieces.next()?.trim().to_string();
            let mut q = 1.0f32;
            let mut explicit_q = false;
            for piece in pieces {
                let piece = piece.trim();
                if let Some(value) = piece.strip_prefix("q=").or_else(|| piece.strip_prefix("Q=")) {
                    if let Ok(parsed) = value.parse::<f32>() {
                        q = parsed;
                        explicit_q = true;
                    }
                }
            }
            Some(AcceptEntry { token, q, explicit_q })
        })
        .collect()
}

/// Picks one scheme from the client's `Accept-Encoding` header and the
/// server's configured, ordered scheme list.
///
/// With explicit q-values the highest weight wins; without them the client's
/// left-to-right order is followed. A bare `*` matches the server's first
/// configured scheme. Ties on equal explicit weights fall back to the
/// server's configured order.
pub fn negotiate(accept_encoding: Option<&str>, server_schemes: &[ContentEncoding]) -> Option<ContentEncoding> {
    let value = accept_encoding?;
    if server_schemes.is_empty() {
        return None;
    }

    let entries = parse_accept_encoding(value);
    let weighted = entries.iter().any(|e| e.explicit_q);

    let server_rank = |scheme: ContentEncoding| {
        server_schemes.iter().position(|s| *s == scheme).unwrap_or(usize::MAX)
    };

    let mut candidates: Vec<(ContentEncoding, f32, usize)> = entries
        .iter()
        .filter(|e| e.q > 0.0)
        .enumerate()
        .filter_map(|(client_rank, entry)| {
            let scheme = if entry.token == "*" {
                server_schemes[0]
            } else {
                ContentEncoding::from_token(&entry.token)?
            };
            if server_rank(scheme) == usize::MAX {
                return None;
            }
            Some((scheme, entry.q, client_rank))
        })
        .collect();

    if candidates.is_empty() {
        return None;
    }

    if weighted {
        // Descending q; equal weights break on the server's configured order.
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| server_rank(a.0).cmp(&server_rank(b.0)))
        });
    } else {
        candidates.sort_by_key(|c| c.2);
    }

    Some(candidates[0].0)
}

/// Compresses `data` in full with the given scheme. `level` of `None` picks
/// the scheme's default.
pub fn compress(encoding: ContentEncoding, level: Option<u32>, data: &[u8]) -> io::Result<Bytes> {
    match encoding {
        ContentEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.unwrap_or(6).min(9)));
            encoder.write_all(data)?;
            Ok(Bytes::from(encoder.finish()?))
        }
        ContentEncoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.unwrap_or(6).min(9)));
            encoder.write_all(data)?;
            Ok(Bytes::from(encoder.finish()?))
        }
        ContentEncoding::Zstd => {
            let level = level.map_or(6, |l| l.min(21) as i32);
            let out = zstd::stream::encode_all(data, level)?;
            Ok(Bytes::from(out))
        }
        ContentEncoding::Brotli => {
            let quality = level.unwrap_or(5).min(11);
            let mut out = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(&mut out, 32 * 1024, quality, 22);
                writer.write_all(data)?;
                writer.flush()?;
            }
            Ok(Bytes::from(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: &[ContentEncoding] = &[ContentEncoding::Brotli, ContentEncoding::Gzip];

    #[test]
    fn weighted_pick_by_q() {
        assert_eq!(negotiate(Some("br;q=0.1, gzip;q=0.9"), BOTH), Some(ContentEncoding::Gzip));
        assert_eq!(negotiate(Some("br;q=0.9, gzip;q=0.1"), BOTH), Some(ContentEncoding::Brotli));
    }

    #[test]
    fn wildcard_matches_server_first() {
        let server = &[ContentEncoding::Gzip, ContentEncoding::Brotli];
        assert_eq!(negotiate(Some("*"), server), Some(ContentEncoding::Gzip));
    }

    #[test]
    fn unweighted_follows_client_order() {
        assert_eq!(negotiate(Some("gzip, br"), BOTH), Some(ContentEncoding::Gzip));
        assert_eq!(negotiate(Some("br, gzip"), BOTH), Some(ContentEncoding::Brotli));
    }

    #[test]
    fn equal_weights_break_on_server_order() {
        let server = &[ContentEncoding::Zstd, ContentEncoding::Gzip];
        assert_eq!(negotiate(Some("gzip;q=0.5, zstd;q=0.5"), server), Some(ContentEncoding::Zstd));
    }

    #[test]
    fn zero_q_excluded() {
        assert_eq!(negotiate(Some("gzip;q=0"), BOTH), None);
        assert_eq!(negotiate(Some("identity"), BOTH), None);
        assert_eq!(negotiate(None, BOTH), None);
    }

    #[test]
    fn gzip_round_trip() {
        use std::io::Read;
        let data = b"hello hello hello hello hello".repeat(50);
        let compressed = compress(ContentEncoding::Gzip, None, &data).unwrap();
        assert!(compressed.len() < data.len());

        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
