use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};

/// Payload compression applied by the sending socket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zlib,
    Deflate,
    Gzip,
}

impl Compression {
    /// Parse an algorithm name; the empty string and "none" disable compression
    pub fn from_name(name: &str) -> BusResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "zlib" => Ok(Compression::Zlib),
            "deflate" => Ok(Compression::Deflate),
            "gzip" => Ok(Compression::Gzip),
            _ => Err(BusError::UnsupportedCompression(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zlib => "zlib",
            Compression::Deflate => "deflate",
            Compression::Gzip => "gzip",
        }
    }
}

/// A payload as it travels through the broker
///
/// The frame records its own encoding so receivers decode it regardless of
/// their own compression settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub encoding: Compression,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn encode(payload: &[u8], encoding: Compression, level: i32) -> BusResult<Self> {
        let level = if (0..=9).contains(&level) {
            flate2::Compression::new(level as u32)
        } else {
            flate2::Compression::default()
        };

        let body = match encoding {
            Compression::None => payload.to_vec(),
            Compression::Zlib => finish(ZlibEncoder::new(Vec::new(), level), payload, |e| {
                e.finish()
            })?,
            Compression::Deflate => {
                finish(DeflateEncoder::new(Vec::new(), level), payload, |e| e.finish())?
            }
            Compression::Gzip => finish(GzEncoder::new(Vec::new(), level), payload, |e| {
                e.finish()
            })?,
        };

        Ok(Self { encoding, body })
    }

    pub fn decode(&self) -> BusResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match self.encoding {
            Compression::None => return Ok(self.body.clone()),
            Compression::Zlib => ZlibDecoder::new(self.body.as_slice()).read_to_end(&mut out),
            Compression::Deflate => DeflateDecoder::new(self.body.as_slice()).read_to_end(&mut out),
            Compression::Gzip => GzDecoder::new(self.body.as_slice()).read_to_end(&mut out),
        };
        result.map_err(BusError::Compression)?;
        Ok(out)
    }
}

fn finish<W: Write>(
    mut encoder: W,
    payload: &[u8],
    close: impl FnOnce(W) -> std::io::Result<Vec<u8>>,
) -> BusResult<Vec<u8>> {
    encoder.write_all(payload).map_err(BusError::Compression)?;
    close(encoder).map_err(BusError::Compression)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names() {
        assert_eq!(Compression::from_name("").unwrap(), Compression::None);
        assert_eq!(Compression::from_name("ZLIB").unwrap(), Compression::Zlib);
        assert_eq!(Compression::from_name("gzip").unwrap().name(), "gzip");
        assert!(matches!(
            Compression::from_name("lz4"),
            Err(BusError::UnsupportedCompression(name)) if name == "lz4"
        ));
    }

    #[test]
    fn test_compressed_frame_shrinks_repetitive_payload() {
        let payload = vec![b'a'; 4096];
        for encoding in [Compression::Zlib, Compression::Deflate, Compression::Gzip] {
            let frame = Frame::encode(&payload, encoding, 9).unwrap();
            assert!(frame.body.len() < payload.len(), "{:?} did not compress", encoding);
            assert_eq!(frame.decode().unwrap(), payload);
        }
    }

    #[test]
    fn test_corrupt_frame_fails_to_decode() {
        let frame = Frame {
            encoding: Compression::Zlib,
            body: b"definitely not zlib".to_vec(),
        };
        assert!(matches!(frame.decode(), Err(BusError::Compression(_))));
    }
}
