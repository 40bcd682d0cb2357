//! Defines the password hash type used for authenticating users.

use bcrypt::{hash, verify};
use serde::{Deserialize, Serialize};

use crate::Error;

/// The default password given to accounts fabricated during a workbook
/// import. Affected accounts are flagged with `must_change_password` and
/// forced to pick a real password on first login.
pub const DEFAULT_IMPORT_PASSWORD: &str = "123456";

/// A bcrypt hash of a user's password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// The default cost used for bcrypt hashing.
    pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

    /// Create a password hash from a raw password string.
    ///
    /// # Errors
    /// Returns an [Error::HashingError] if the underlying hash function fails.
    pub fn from_raw_password(raw_password: &str, cost: u32) -> Result<Self, Error> {
        hash(raw_password, cost)
            .map(Self)
            .map_err(|error| Error::HashingError(error.to_string()))
    }

    /// Wrap a string that is already a bcrypt hash, e.g. one read from
    /// the database.
    ///
    /// The caller should ensure that the string is a valid hash,
    /// otherwise [PasswordHash::verify] will always fail.
    pub fn new_unchecked(raw_password_hash: &str) -> Self {
        Self(raw_password_hash.to_string())
    }

    /// Check whether `raw_password` matches this hash.
    ///
    /// # Errors
    /// Returns an [Error::HashingError] if the hash string is malformed.
    pub fn verify(&self, raw_password: &str) -> Result<bool, Error> {
        verify(raw_password, &self.0).map_err(|error| Error::HashingError(error.to_string()))
    }
}

impl AsRef<str> for PasswordHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
