//! RFC 6238 time-based one-time passwords over HMAC-SHA-256, plus the RFC 4648
//! base32 alphabet used to share secrets with authenticator apps.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Shared-secret length in bytes (160 bits).
pub const SECRET_LEN: usize = 20;

/// Code parameters. Built through [`Totp::new`], which keeps the step
/// non-zero and the digit count within 6..=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totp {
    step_secs: u64,
    digits: u32,
    skew_steps: u32,
}

impl Default for Totp {
    fn default() -> Self {
        Self {
            step_secs: 30,
            digits: 6,
            skew_steps: 1,
        }
    }
}

impl Totp {
    pub fn new(step_secs: u64, digits: u32, skew_steps: u32) -> Self {
        Self {
            step_secs: step_secs.max(1),
            digits: digits.clamp(6, 8),
            skew_steps,
        }
    }

    pub fn step_secs(&self) -> u64 {
        self.step_secs
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    pub fn skew_steps(&self) -> u32 {
        self.skew_steps
    }

    pub fn step_at(&self, unix_secs: i64) -> u64 {
        u64::try_from(unix_secs).unwrap_or(0) / self.step_secs
    }

    /// Code for a time step. `None` if the key is unusable or the digit
    /// count has no `u32` modulus.
    pub fn code_for_step(&self, secret: &[u8], step: u64) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(&step.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let bin = u32::from_be_bytes([
            digest[offset] & 0x7f,
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]);
        let modulus = 10u32.checked_pow(self.digits)?;
        Some(format!(
            "{:0width$}",
            bin % modulus,
            width = self.digits as usize
        ))
    }

    pub fn code_at(&self, secret_b32: &str, unix_secs: i64) -> Option<String> {
        let key = base32_decode(secret_b32)?;
        self.code_for_step(&key, self.step_at(unix_secs))
    }

    /// Returns the matched time step when `code` is valid within the skew
    /// window and strictly after `after_step`.
    pub fn verify(
        &self,
        secret_b32: &str,
        code: &str,
        unix_secs: i64,
        after_step: Option<u64>,
    ) -> Option<u64> {
        let code = code.trim();
        if code.len() != self.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let key = base32_decode(secret_b32)?;
        let now = self.step_at(unix_secs);
        let skew = u64::from(self.skew_steps);
        let lo = now.saturating_sub(skew);
        let hi = now.saturating_add(skew);
        (lo..=hi)
            .filter(|s| after_step.map_or(true, |last| *s > last))
            .find(|s| {
                self.code_for_step(&key, *s)
                    .map(|c| constant_time_eq(c.as_bytes(), code.as_bytes()))
                    .unwrap_or(false)
            })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// New random secret, base32 without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

/// `otpauth://` URI for QR enrollment.
pub fn provisioning_uri(issuer: &str, account: &str, secret_b32: &str, totp: &Totp) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA256&digits={digits}&period={period}",
        issuer = percent_encode(issuer),
        account = percent_encode(account),
        secret = secret_b32,
        digits = totp.digits(),
        period = totp.step_secs(),
    )
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b'@') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Case-insensitive; ignores padding and spaces. `None` on foreign characters.
pub fn base32_decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in s.chars() {
        if c == '=' || c.is_whitespace() {
            continue;
        }
        let upper = c.to_ascii_uppercase() as u8;
        let val = BASE32_ALPHABET.iter().position(|&a| a == upper)? as u32;
        buffer = (buffer << 5) | val;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    if out.is_empty() {
        return None;
    }
    Some(out)
}
