//! # Operational Transformation
//!
//! Character-level edit convergence for the room hub. Concurrent edit
//! batches submitted against the same base version are transformed so that
//! every peer converges on the same buffer regardless of arrival order. The
//! hub is the central serializer: it transforms each incoming batch against
//! every accepted operation at or above the submitter's base version.
//!
//! Positions are code-point offsets, never byte offsets.

mod operation;
mod transform;

pub use operation::{char_len, EditOp, Operation, OpKind};
pub use transform::{compose, transform_batch, transform_op};

use thiserror::Error;

/// Errors produced while validating or applying operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OtError {
    #[error("position {position} is outside a buffer of length {buffer_len}")]
    OutOfBounds { position: usize, buffer_len: usize },

    #[error("operation has zero length")]
    Empty,
}

/// Apply a single operation to the buffer.
pub fn apply(buffer: &str, op: &Operation) -> Result<String, OtError> {
    let buffer_len = char_len(buffer);

    match &op.kind {
        OpKind::Insert { text } => {
            if text.is_empty() {
                return Err(OtError::Empty);
            }
            if op.position > buffer_len {
                return Err(OtError::OutOfBounds {
                    position: op.position,
                    buffer_len,
                });
            }
            let at = byte_offset(buffer, op.position);
            let mut out = String::with_capacity(buffer.len() + text.len());
            out.push_str(&buffer[..at]);
            out.push_str(text);
            out.push_str(&buffer[at..]);
            Ok(out)
        }
        OpKind::Delete { len } => {
            if *len == 0 {
                return Err(OtError::Empty);
            }
            if op.position + len > buffer_len {
                return Err(OtError::OutOfBounds {
                    position: op.position + len,
                    buffer_len,
                });
            }
            let start = byte_offset(buffer, op.position);
            let end = byte_offset(buffer, op.position + len);
            let mut out = String::with_capacity(buffer.len());
            out.push_str(&buffer[..start]);
            out.push_str(&buffer[end..]);
            Ok(out)
        }
        OpKind::Retain { len } => {
            if *len == 0 {
                return Err(OtError::Empty);
            }
            if op.position + len > buffer_len {
                return Err(OtError::OutOfBounds {
                    position: op.position + len,
                    buffer_len,
                });
            }
            Ok(buffer.to_string())
        }
    }
}

/// Apply a batch in order. Any out-of-bounds operation rejects the whole
/// batch, leaving the caller's buffer untouched.
pub fn apply_batch(buffer: &str, ops: &[Operation]) -> Result<String, OtError> {
    let mut out = buffer.to_string();
    for op in ops {
        out = apply(&out, op)?;
    }
    Ok(out)
}

/// Signed buffer-length delta a batch produces: inserts add, deletes
/// subtract, retains contribute nothing.
pub fn length_delta(ops: &[Operation]) -> i64 {
    ops.iter()
        .map(|op| match &op.kind {
            OpKind::Insert { text } => char_len(text) as i64,
            OpKind::Delete { len } => -(*len as i64),
            OpKind::Retain { .. } => 0,
        })
        .sum()
}

/// Byte offset of the `pos`-th code point. `pos` must be <= char_len(s).
fn byte_offset(s: &str, pos: usize) -> usize {
    s.char_indices()
        .nth(pos)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ins(pos: usize, text: &str) -> Operation {
        Operation::insert(pos, text.to_string(), Uuid::nil(), 0)
    }

    fn del(pos: usize, len: usize) -> Operation {
        Operation::delete(pos, len, Uuid::nil(), 0)
    }

    #[test]
    fn test_apply_insert() {
        let out = apply("world", &ins(0, "hello ")).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_apply_delete() {
        let out = apply("hello world", &del(5, 6)).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_apply_retain_is_identity() {
        let op = Operation::retain(0, 5, Uuid::nil(), 0);
        assert_eq!(apply("hello", &op).unwrap(), "hello");
    }

    #[test]
    fn test_positions_are_code_points() {
        // "héllo" is 5 code points but 6 bytes.
        let out = apply("héllo", &ins(5, "!")).unwrap();
        assert_eq!(out, "héllo!");

        let out = apply("héllo", &del(1, 1)).unwrap();
        assert_eq!(out, "hllo");
    }

    #[test]
    fn test_out_of_bounds_insert() {
        let err = apply("ab", &ins(3, "x")).unwrap_err();
        assert_eq!(
            err,
            OtError::OutOfBounds {
                position: 3,
                buffer_len: 2
            }
        );
    }

    #[test]
    fn test_delete_past_end() {
        assert!(apply("ab", &del(1, 5)).is_err());
    }

    #[test]
    fn test_batch_failure_is_atomic() {
        let ops = vec![ins(0, "xy"), del(10, 1)];
        assert!(apply_batch("ab", &ops).is_err());
    }

    #[test]
    fn test_length_delta() {
        let ops = vec![ins(0, "abc"), del(0, 2), Operation::retain(0, 1, Uuid::nil(), 0)];
        assert_eq!(length_delta(&ops), 1);
    }

    #[test]
    fn test_length_arithmetic_invariant() {
        let buffer = "fn main() {}";
        let ops = vec![ins(3, "x"), del(0, 2), ins(5, "yz")];
        let out = apply_batch(buffer, &ops).unwrap();
        let expected = char_len(buffer) as i64 + length_delta(&ops);
        assert_eq!(char_len(&out) as i64, expected);
    }
}
