use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::cipher::{CipherError, FieldCipher, SealedField};
use crate::auth::dto::PublicUser;

/// The two roles the platform knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// User record in the database. `display_name` and `email` hold hex
/// ciphertext with their IVs when field encryption is on, plaintext
/// with NULL IVs otherwise. `email_lookup` is the deterministic key
/// both uniqueness and login resolve against.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub display_name_iv: Option<String>,
    pub email: String,
    pub email_iv: Option<String>,
    pub email_lookup: String,
    pub password_hash: String,
    pub role: Role,
    pub is_verified: bool,
    pub verification_token: Option<String>,
    pub verification_token_expiry: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn sealed_display_name(&self) -> SealedField {
        SealedField {
            value: self.display_name.clone(),
            iv: self.display_name_iv.clone(),
        }
    }

    pub fn sealed_email(&self) -> SealedField {
        SealedField {
            value: self.email.clone(),
            iv: self.email_iv.clone(),
        }
    }

    /// Client-facing view with PII fields opened. Decryption failure
    /// propagates; it is an operator problem, not a missing record.
    pub fn public(&self, cipher: &dyn FieldCipher) -> Result<PublicUser, CipherError> {
        Ok(PublicUser {
            id: self.id,
            display_name: cipher.open(&self.sealed_display_name())?,
            email: cipher.open(&self.sealed_email())?,
            role: self.role,
            is_verified: self.is_verified,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_only_the_two_known_values() {
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("Admin"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }
}
