use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use super::CompressionStage;

/// Terminal, reversible stage: DEFLATE followed by URL-safe, unpadded base64.
#[derive(Default)]
pub struct BinaryEncoder;

impl CompressionStage for BinaryEncoder {
    fn name(&self) -> &'static str {
        "binary_encoder"
    }

    fn reversible(&self) -> bool {
        true
    }

    fn encode(&self, text: &str) -> String {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        if encoder.write_all(text.as_bytes()).is_err() {
            return text.to_string();
        }
        match encoder.finish() {
            Ok(deflated) => URL_SAFE_NO_PAD.encode(deflated),
            Err(_) => text.to_string(),
        }
    }

    fn decode(&self, text: &str) -> String {
        let Ok(bytes) = URL_SAFE_NO_PAD.decode(text) else {
            return text.to_string();
        };
        let mut decoder = DeflateDecoder::new(&bytes[..]);
        let mut out = String::new();
        match decoder.read_to_string(&mut out) {
            Ok(_) => out,
            Err(_) => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_exactly() {
        let enc = BinaryEncoder::default();
        let input = "the quick brown fox jumps over the lazy dog, repeatedly, for emphasis";
        let encoded = enc.encode(input);
        assert_ne!(encoded, input);
        assert_eq!(enc.decode(&encoded), input);
    }

    #[test]
    fn encoded_text_is_url_safe_base64() {
        let enc = BinaryEncoder::default();
        let encoded = enc.encode("hello world");
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }

    #[test]
    fn garbage_input_to_decode_falls_back_to_itself() {
        let enc = BinaryEncoder::default();
        assert_eq!(enc.decode("not valid base64!!"), "not valid base64!!");
    }
}
