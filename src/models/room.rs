//! Rooms and memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Bounds from the room validation rules.
pub const NAME_MIN: usize = 3;
pub const NAME_MAX: usize = 100;
pub const PASSWORD_MIN: usize = 4;
pub const PASSWORD_MAX: usize = 50;
pub const CAPACITY_MIN: u32 = 2;
pub const CAPACITY_MAX: u32 = 50;

/// Room visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(AppError::Validation(format!("unknown visibility {other}"))),
        }
    }
}

/// Role of a member within a room. Exactly one owner exists per room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Member,
    Admin,
    Owner,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Admin => "admin",
            MemberRole::Owner => "owner",
        }
    }

    /// Whether this role may update room metadata.
    pub fn can_manage(&self) -> bool {
        matches!(self, MemberRole::Admin | MemberRole::Owner)
    }
}

impl std::str::FromStr for MemberRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(MemberRole::Member),
            "admin" => Ok(MemberRole::Admin),
            "owner" => Ok(MemberRole::Owner),
            other => Err(AppError::Validation(format!("unknown role {other}"))),
        }
    }
}

/// A collaborative room. The code/input/output buffers are the last flushed
/// state; while sockets are connected the hub's runtime mirror is
/// authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Opaque short room code used in URLs and events.
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    /// Present iff the room is private.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub max_capacity: u32,
    pub language: String,
    #[serde(skip_serializing, default)]
    pub code: String,
    #[serde(skip_serializing, default)]
    pub input: String,
    #[serde(skip_serializing, default)]
    pub output: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Invariant check: private rooms carry a verifier, public rooms do not.
    pub fn password_invariant_holds(&self) -> bool {
        match self.visibility {
            Visibility::Private => self.password_hash.is_some(),
            Visibility::Public => self.password_hash.is_none(),
        }
    }
}

/// Input for room creation, validated before it reaches the repository.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    /// Cleartext password for private rooms, hashed by the auth layer.
    pub password: Option<String>,
    pub max_capacity: u32,
    pub language: String,
    pub owner_id: Uuid,
}

impl NewRoom {
    /// Validate the structural rules. Language membership in the supported
    /// set is checked separately against the sandbox language table.
    pub fn validate(&self) -> AppResult<()> {
        let name_len = self.name.trim().chars().count();
        if !(NAME_MIN..=NAME_MAX).contains(&name_len) {
            return Err(AppError::Validation(format!(
                "room name must be {NAME_MIN}-{NAME_MAX} characters"
            )));
        }

        if !(CAPACITY_MIN..=CAPACITY_MAX).contains(&self.max_capacity) {
            return Err(AppError::Validation(format!(
                "capacity must be {CAPACITY_MIN}-{CAPACITY_MAX}"
            )));
        }

        match (self.visibility, &self.password) {
            (Visibility::Private, Some(pw)) => {
                let len = pw.chars().count();
                if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
                    return Err(AppError::Validation(format!(
                        "room password must be {PASSWORD_MIN}-{PASSWORD_MAX} characters"
                    )));
                }
            }
            (Visibility::Private, None) => {
                return Err(AppError::Validation(
                    "private rooms require a password".into(),
                ));
            }
            (Visibility::Public, Some(_)) => {
                return Err(AppError::Validation(
                    "public rooms cannot have a password".into(),
                ));
            }
            (Visibility::Public, None) => {}
        }

        Ok(())
    }
}

/// Partial metadata update applied by an owner or admin.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_capacity: Option<u32>,
}

impl RoomUpdate {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            let len = name.trim().chars().count();
            if !(NAME_MIN..=NAME_MAX).contains(&len) {
                return Err(AppError::Validation(format!(
                    "room name must be {NAME_MIN}-{NAME_MAX} characters"
                )));
            }
        }
        if let Some(cap) = self.max_capacity {
            if !(CAPACITY_MIN..=CAPACITY_MAX).contains(&cap) {
                return Err(AppError::Validation(format!(
                    "capacity must be {CAPACITY_MIN}-{CAPACITY_MAX}"
                )));
            }
        }
        Ok(())
    }
}

/// Membership of a user in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: Uuid,
    pub room_id: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// Generate an opaque 10-character room code from an unambiguous lowercase
/// alphabet (no `l`, `o`, `0`, `1`).
pub fn generate_room_code() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";
    let mut rng = rand::thread_rng();
    (0..10)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
