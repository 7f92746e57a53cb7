//! Portable session string encoding.
//!
//! Layout (big-endian, 271 bytes), URL-safe base64 without padding:
//!
//! | field     | size |
//! |-----------|------|
//! | dc_id     | 1    |
//! | api_id    | 4    |
//! | test_mode | 1    |
//! | auth_key  | 256  |
//! | user_id   | 8    |
//! | is_bot    | 1    |

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

const ENCODED_LEN: usize = 1 + 4 + 1 + 256 + 8 + 1;

/// Errors when decoding a session string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionStringError {
    #[error("Session string is not valid base64: {0}")]
    Base64(String),

    #[error("Session string has {0} bytes, expected {ENCODED_LEN}")]
    Length(usize),
}

/// Everything another client needs to resume an authorized account session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionString {
    pub dc_id: u8,
    pub api_id: u32,
    pub test_mode: bool,
    pub auth_key: [u8; 256],
    pub user_id: u64,
    pub is_bot: bool,
}

impl SessionString {
    /// Encodes to the portable text form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buf = Vec::with_capacity(ENCODED_LEN);
        buf.push(self.dc_id);
        buf.extend_from_slice(&self.api_id.to_be_bytes());
        buf.push(u8::from(self.test_mode));
        buf.extend_from_slice(&self.auth_key);
        buf.extend_from_slice(&self.user_id.to_be_bytes());
        buf.push(u8::from(self.is_bot));
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// Decodes the portable text form.
    pub fn decode(text: &str) -> Result<Self, SessionStringError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(text.trim().trim_end_matches('='))
            .map_err(|e| SessionStringError::Base64(e.to_string()))?;
        if bytes.len() != ENCODED_LEN {
            return Err(SessionStringError::Length(bytes.len()));
        }

        let mut api_id = [0u8; 4];
        api_id.copy_from_slice(&bytes[1..5]);
        let mut auth_key = [0u8; 256];
        auth_key.copy_from_slice(&bytes[6..262]);
        let mut user_id = [0u8; 8];
        user_id.copy_from_slice(&bytes[262..270]);

        Ok(Self {
            dc_id: bytes[0],
            api_id: u32::from_be_bytes(api_id),
            test_mode: bytes[5] != 0,
            auth_key,
            user_id: u64::from_be_bytes(user_id),
            is_bot: bytes[270] != 0,
        })
    }
}

impl std::fmt::Debug for SessionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionString")
            .field("dc_id", &self.dc_id)
            .field("api_id", &self.api_id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}
