//! Operation types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an operation does to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Insert `text` at the operation position.
    Insert { text: String },
    /// Delete `len` code points starting at the position.
    Delete { len: usize },
    /// Assert `len` code points at the position stay untouched.
    Retain { len: usize },
}

/// A primitive edit, stamped by the hub with its author and a per-room
/// lamport timestamp. The timestamp makes the insert-insert tie-break
/// `(timestamp, author)` a total order shared by every peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub position: usize,
    pub author: Uuid,
    pub timestamp: u64,
}

impl Operation {
    pub fn insert(position: usize, text: String, author: Uuid, timestamp: u64) -> Self {
        Self {
            kind: OpKind::Insert { text },
            position,
            author,
            timestamp,
        }
    }

    pub fn delete(position: usize, len: usize, author: Uuid, timestamp: u64) -> Self {
        Self {
            kind: OpKind::Delete { len },
            position,
            author,
            timestamp,
        }
    }

    pub fn retain(position: usize, len: usize, author: Uuid, timestamp: u64) -> Self {
        Self {
            kind: OpKind::Retain { len },
            position,
            author,
            timestamp,
        }
    }

    /// Number of code points the operation spans.
    pub fn len(&self) -> usize {
        match &self.kind {
            OpKind::Insert { text } => char_len(text),
            OpKind::Delete { len } | OpKind::Retain { len } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclusive end of the range this operation touches.
    pub fn end(&self) -> usize {
        match &self.kind {
            OpKind::Insert { .. } => self.position,
            OpKind::Delete { len } | OpKind::Retain { len } => self.position + len,
        }
    }

    /// Tie-break key for concurrent inserts at the same position.
    pub fn tie_key(&self) -> (u64, Uuid) {
        (self.timestamp, self.author)
    }
}

/// Number of code points in a string.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ============================================================================
// Wire Form
// ============================================================================

/// Client-facing operation as carried in `code:update` frames. The hub
/// attaches author and timestamp on acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditOp {
    Insert { position: usize, text: String },
    Delete { position: usize, length: usize },
    Retain { position: usize, length: usize },
}

impl EditOp {
    /// Structural validity: inserts carry text, deletes and retains carry a
    /// positive length.
    pub fn is_well_formed(&self) -> bool {
        match self {
            EditOp::Insert { text, .. } => !text.is_empty(),
            EditOp::Delete { length, .. } | EditOp::Retain { length, .. } => *length > 0,
        }
    }

    /// Stamp the wire op into a full operation.
    pub fn into_operation(self, author: Uuid, timestamp: u64) -> Operation {
        match self {
            EditOp::Insert { position, text } => Operation::insert(position, text, author, timestamp),
            EditOp::Delete { position, length } => {
                Operation::delete(position, length, author, timestamp)
            }
            EditOp::Retain { position, length } => {
                Operation::retain(position, length, author, timestamp)
            }
        }
    }
}

impl From<&Operation> for EditOp {
    fn from(op: &Operation) -> Self {
        match &op.kind {
            OpKind::Insert { text } => EditOp::Insert {
                position: op.position,
                text: text.clone(),
            },
            OpKind::Delete { len } => EditOp::Delete {
                position: op.position,
                length: *len,
            },
            OpKind::Retain { len } => EditOp::Retain {
                position: op.position,
                length: *len,
            },
        }
    }
}
