use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use crate::error::Result;

/// Raw PCM size above which the service has been seen to reject clips.
pub const RECOMMENDED_MAX_PCM_BYTES: usize = 500 * 1024;

/// Read the whole PCM snippet and base64-encode it (standard alphabet,
/// padded, no line breaks) for a `text/plain` request body.
pub async fn encode(pcm_path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(pcm_path).await?;
    Ok(encode_bytes(&bytes))
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    if bytes.len() > RECOMMENDED_MAX_PCM_BYTES {
        warn!(
            bytes = bytes.len(),
            limit = RECOMMENDED_MAX_PCM_BYTES,
            "PCM snippet larger than the service usually accepts"
        );
    }
    let payload = STANDARD.encode(bytes);
    debug!(raw = bytes.len(), encoded = payload.len(), "encoded payload");
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_encode_bytes_standard_alphabet() {
        assert_eq!(encode_bytes(b""), "");
        assert_eq!(encode_bytes(b"f"), "Zg==");
        assert_eq!(encode_bytes(&[0xfb, 0xff]), "+/8=");
    }

    #[test]
    fn test_encode_bytes_no_line_wrapping() {
        let payload = encode_bytes(&vec![0u8; 100_000]);
        assert!(!payload.contains('\n'));
        assert!(!payload.contains('\r'));
        assert_eq!(payload.len(), 100_000usize.div_ceil(3) * 4);
    }

    #[tokio::test]
    async fn test_encode_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("clip.raw");
        std::fs::write(&path, [0x00, 0x01, 0xff, 0x7f]).unwrap();
        assert_eq!(encode(&path).await.unwrap(), "AAH/fw==");
    }

    #[tokio::test]
    async fn test_encode_missing_file_is_io_error() {
        let err = encode(Path::new("/nonexistent/clip.raw")).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
