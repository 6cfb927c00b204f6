//! Opaque (username, token) credentials

use rand::Rng;
use std::fmt;

/// Credentials presented by a caller
///
/// The token is an opaque bearer string compared verbatim against the stored
/// value. It never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Credentials only when both parts are present
    pub fn from_parts(username: Option<&str>, token: Option<&str>) -> Option<Self> {
        Some(Self::new(username?, token?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Fresh random credentials for a provisioned user
pub fn generate_credentials() -> Credentials {
    let mut rng = rand::rng();

    let mut name = [0u8; 6];
    rng.fill(&mut name);
    let mut token = [0u8; 32];
    rng.fill(&mut token);

    Credentials::new(format!("user-{}", hex::encode(name)), hex::encode(token))
}
