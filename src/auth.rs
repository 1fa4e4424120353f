//! Client authentication with `mysql_native_password`.

use rand::Rng;
use sha1::{Digest, Sha1};

/// Plugin name the proxy authenticates with.
pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// Credentials clients must present to the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub user: String,
    pub pass: String,
}

impl ProxyCredentials {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }

    /// Check a handshake response against these credentials.
    pub fn verify(&self, auth_plugin: &str, username: &[u8], salt: &[u8], auth_data: &[u8]) -> bool {
        if auth_plugin != NATIVE_PASSWORD_PLUGIN {
            return false;
        }
        username == self.user.as_bytes()
            && verify_native_password(self.pass.as_bytes(), salt, auth_data)
    }
}

/// Random 20-byte scramble of printable ASCII (never NUL).
pub fn generate_salt() -> [u8; 20] {
    let mut rng = rand::rng();
    let mut salt = [0u8; 20];
    for byte in salt.iter_mut() {
        *byte = rng.random_range(33u8..127);
    }
    salt
}

fn sha1(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`; empty for an
/// empty password.
pub fn scramble_native_password(password: &[u8], salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = sha1(&[password]);
    let stage2 = sha1(&[stage1.as_slice()]);
    let mask = sha1(&[salt, stage2.as_slice()]);
    stage1.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect()
}

/// Check a client's scrambled password.
pub fn verify_native_password(password: &[u8], salt: &[u8], auth_data: &[u8]) -> bool {
    // Some clients send the 20 byte scramble NUL-terminated
    let auth_data = match auth_data {
        [data @ .., 0] if data.len() == 20 => data,
        data => data,
    };
    let expected = scramble_native_password(password, salt);
    expected.len() == auth_data.len()
        && expected
            .iter()
            .zip(auth_data)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
