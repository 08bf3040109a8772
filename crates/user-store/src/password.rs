use core::fmt;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::Argon2;

use crate::StoreError;

/// Argon2 password hash in PHC string format.
///
/// The cleartext password never leaves this module once hashed.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn hash(password: &str) -> Result<Self, StoreError> {
        if password.is_empty() {
            return Err(StoreError::invalid("password", "the password field must be set"));
        }

        let salt = SaltString::generate(&mut OsRng);

        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("failed to hash password: {e}")))?;

        Ok(Self(hash.to_string()))
    }

    pub fn verify(&self, password: &str) -> bool {
        let Ok(parsed) = argon2::password_hash::PasswordHash::new(&self.0) else {
            warn!("stored password hash is not a valid PHC string");
            return false;
        };

        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    }

    /// Wraps an already-encoded PHC string read back from storage.
    pub fn from_phc_string(phc: String) -> Self {
        Self(phc)
    }

    pub fn as_phc_string(&self) -> &str {
        &self.0
    }
}

// Never leak the hash in debug output or logs.
impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(…)")
    }
}
