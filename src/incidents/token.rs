//! Forensic tokens: one opaque secret per incident.
//!
//! `token = hex(HMAC-SHA256(plant_secret, id ‖ created_at_be ‖ nonce_be))`
//!
//! The nonce is drawn from the incident engine's RNG at creation, so two
//! incidents with the same id (after a restart) still get distinct tokens.
//! Crypto is handled by the `hmac-sha256` crate.

/// 64 lowercase hex chars.
pub type ForensicToken = heapless::String<64>;

fn message(id: &str, created_at: u64, nonce: u64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(id.len() + 16);
    msg.extend_from_slice(id.as_bytes());
    msg.extend_from_slice(&created_at.to_be_bytes());
    msg.extend_from_slice(&nonce.to_be_bytes());
    msg
}

/// Derive the token for one incident.
pub fn derive(secret: &[u8], id: &str, created_at: u64, nonce: u64) -> ForensicToken {
    let tag = hmac_sha256::HMAC::mac(message(id, created_at, nonce), secret);
    let mut out = ForensicToken::new();
    for byte in tag {
        let _ = out.push(hex_digit(byte >> 4));
        let _ = out.push(hex_digit(byte & 0x0f));
    }
    out
}

/// Constant-time check of a submitted hex token.
pub fn verify(secret: &[u8], id: &str, created_at: u64, nonce: u64, token: &str) -> bool {
    let Some(tag) = parse_hex(token) else {
        return false;
    };
    hmac_sha256::HMAC::verify(message(id, created_at, nonce), secret, &tag)
}

fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16).unwrap_or('0')
}

fn parse_hex(token: &str) -> Option<[u8; 32]> {
    let bytes = token.trim().as_bytes();
    if bytes.len() != 64 {
        return None;
    }
    let mut tag = [0u8; 32];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        tag[i] = (hi * 16 + lo) as u8;
    }
    Some(tag)
}
