use std::io::{Read, Write};

use flate2::{
    Compression,
    read::{GzDecoder, ZlibDecoder},
    write::GzEncoder,
};

/// what we ask upstreams for, anything else can't be decoded for filtering
pub const UPSTREAM_ACCEPT_ENCODING: &str = "gzip, deflate, zstd";

/// encodings the gateway can send back to clients
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContentEncoding {
    Zstd,
    Gzip,
    None,
}

impl ContentEncoding {
    /// pick the best encoding the client accepts, zstd first then gzip
    pub fn from_accept_encoding(accept_encoding: Option<&str>) -> Self {
        match accept_encoding {
            Some(v) => {
                let v = v.to_ascii_lowercase();
                // identity-only clients get identity
                if v == "identity" || v.starts_with("identity,") {
                    return Self::None;
                }
                if Self::accepts(&v, "zstd") {
                    Self::Zstd
                } else if Self::accepts(&v, "gzip") {
                    Self::Gzip
                } else {
                    Self::None
                }
            }
            None => Self::None,
        }
    }

    // "gzip;q=0" means the client explicitly refuses gzip
    fn accepts(accept_encoding: &str, coding: &str) -> bool {
        accept_encoding.split(',').any(|part| {
            let mut pieces = part.split(';').map(str::trim);
            let name = pieces.next().unwrap_or("");
            let refused = pieces.any(|param| {
                param
                    .strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q == 0.0)
            });
            name == coding && !refused
        })
    }

    pub fn as_header_value(&self) -> Option<&'static str> {
        match self {
            Self::Zstd => Some("zstd"),
            Self::Gzip => Some("gzip"),
            Self::None => None,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        match self {
            Self::Zstd => zstd::encode_all(data, 3),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::None => Ok(data.to_vec()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unsupported content-encoding '{0}'")]
    Unsupported(String),

    #[error("decoded body exceeded {0} bytes")]
    TooLarge(usize),

    #[error("failed to decode body: {0}")]
    Io(#[from] std::io::Error),
}

fn normalize(content_encoding: Option<&str>) -> String {
    content_encoding
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// whether `decode_body` can turn this content-encoding back into plain bytes
pub fn is_decodable(content_encoding: Option<&str>) -> bool {
    matches!(
        normalize(content_encoding).as_str(),
        "" | "identity" | "gzip" | "x-gzip" | "deflate" | "zstd"
    )
}

/// undo the upstream's content-encoding so the filter sees plain bytes
///
/// `limit` bounds the decoded size, a tiny gzip body can inflate to gigabytes
pub fn decode_body(
    bytes: Vec<u8>,
    content_encoding: Option<&str>,
    limit: usize,
) -> Result<Vec<u8>, DecodeError> {
    let encoding = normalize(content_encoding);

    let reader: Box<dyn Read + '_> = match encoding.as_str() {
        "" | "identity" => return Ok(bytes),
        "gzip" | "x-gzip" => Box::new(GzDecoder::new(&bytes[..])),
        "deflate" => Box::new(ZlibDecoder::new(&bytes[..])),
        "zstd" => Box::new(zstd::stream::read::Decoder::new(&bytes[..])?),
        other => return Err(DecodeError::Unsupported(other.to_string())),
    };

    let mut decoded = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut decoded)?;

    if decoded.len() > limit {
        return Err(DecodeError::TooLarge(limit));
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_zstd_then_gzip() {
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("gzip, deflate, br, zstd")),
            ContentEncoding::Zstd
        );
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("gzip, deflate")),
            ContentEncoding::Gzip
        );
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("br")),
            ContentEncoding::None
        );
        assert_eq!(ContentEncoding::from_accept_encoding(None), ContentEncoding::None);
    }

    #[test]
    fn respects_identity_and_zero_quality() {
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("identity")),
            ContentEncoding::None
        );
        assert_eq!(
            ContentEncoding::from_accept_encoding(Some("zstd;q=0, gzip;q=0.8")),
            ContentEncoding::Gzip
        );
    }

    #[test]
    fn decodes_what_it_compresses() {
        let body = b"<html><body>hello</body></html>".repeat(20);

        for encoding in [ContentEncoding::Gzip, ContentEncoding::Zstd] {
            let compressed = encoding.compress(&body).unwrap();
            let decoded =
                decode_body(compressed, encoding.as_header_value(), 1 << 20).unwrap();
            assert_eq!(decoded, body);
        }
    }

    #[test]
    fn identity_bodies_are_untouched() {
        let body = b"plain".to_vec();
        assert_eq!(decode_body(body.clone(), None, 10).unwrap(), body);
        assert_eq!(decode_body(body.clone(), Some("identity"), 10).unwrap(), body);
    }

    #[test]
    fn knows_what_it_can_decode() {
        assert!(is_decodable(None));
        assert!(is_decodable(Some("GZIP")));
        assert!(is_decodable(Some("zstd")));
        assert!(!is_decodable(Some("br")));
        assert!(!is_decodable(Some("gzip, br")));
    }

    #[test]
    fn refuses_unknown_encodings() {
        assert!(matches!(
            decode_body(vec![1, 2, 3], Some("br"), 10),
            Err(DecodeError::Unsupported(e)) if e == "br"
        ));
    }

    #[test]
    fn caps_decoded_size() {
        let bomb = ContentEncoding::Gzip.compress(&vec![0u8; 4096]).unwrap();

        assert!(matches!(
            decode_body(bomb, Some("gzip"), 1024),
            Err(DecodeError::TooLarge(1024))
        ));
    }
}
