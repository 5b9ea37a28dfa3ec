//! # Data Model
//!
//! Persistent entities shared by the repository, the hub, and the API layer:
//! users, rooms, memberships, chat messages, and execution logs.

pub mod execution;
pub mod message;
pub mod room;
pub mod user;

pub use execution::{ExecutionLog, ExecutionResult, ExecutionStatus, NewExecution};
pub use message::{ChatMessage, MessageKind, NewChatMessage};
pub use room::{Membership, MemberRole, NewRoom, Room, RoomUpdate, Visibility};
pub use user::{NewUser, PublicUser, User};
