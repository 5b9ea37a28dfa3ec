//! User accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// A registered account. The password verifier is an opaque argon2 hash and
/// never leaves the repository layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Input for account creation. Email is case-folded before storage so
/// uniqueness holds regardless of the casing the client sent.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
}

impl NewUser {
    /// Normalize and validate registration input. The password itself is
    /// validated before hashing by the auth layer.
    pub fn new(email: &str, display_name: &str, password_hash: String) -> AppResult<Self> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') || email.len() < 5 || email.len() > 254 {
            return Err(AppError::Validation("invalid email address".into()));
        }

        let display_name = display_name.trim().to_string();
        if display_name.is_empty() || display_name.chars().count() > 60 {
            return Err(AppError::Validation(
                "display name must be 1-60 characters".into(),
            ));
        }

        Ok(Self {
            email,
            display_name,
            password_hash,
        })
    }
}

/// Public projection of a user, safe to broadcast to room peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub display_name: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_case_folded() {
        let user = NewUser::new("Alice@Example.COM", "Alice", "hash".into()).unwrap();
        assert_eq!(user.email, "alice@example.com");
    }

    #[test]
    fn test_rejects_invalid_email() {
        assert!(NewUser::new("nope", "Alice", "hash".into()).is_err());
        assert!(NewUser::new("a@b", "Alice", "hash".into()).is_err());
    }

    #[test]
    fn test_rejects_empty_display_name() {
        assert!(NewUser::new("alice@example.com", "   ", "hash".into()).is_err());
    }
}
