//! Pairwise transformation and batch composition.

use super::operation::{char_len, OpKind, Operation};

/// Transform `op` against a concurrent `against` that has already been
/// applied to the buffer. Returns `None` when `op` is entirely consumed
/// (its whole range was deleted by `against`).
pub fn transform_op(op: &Operation, against: &Operation) -> Option<Operation> {
    let mut out = op.clone();

    match (&op.kind, &against.kind) {
        // ------------------------------------------------------------------
        // Insert vs Insert: equal positions break the tie on
        // (timestamp, author); the lower key stays left.
        // ------------------------------------------------------------------
        (OpKind::Insert { .. }, OpKind::Insert { text }) => {
            let shift = op.position > against.position
                || (op.position == against.position && op.tie_key() > against.tie_key());
            if shift {
                out.position += char_len(text);
            }
        }

        // ------------------------------------------------------------------
        // Insert vs Delete: before the deleted range is untouched, after it
        // shifts left, inside it clamps to the deletion point.
        // ------------------------------------------------------------------
        (OpKind::Insert { .. }, OpKind::Delete { len }) => {
            if op.position <= against.position {
                // unchanged
            } else if op.position >= against.position + len {
                out.position -= len;
            } else {
                out.position = against.position;
            }
        }

        // ------------------------------------------------------------------
        // Delete/Retain vs Insert: a concurrent insert before the range
        // shifts it right; an insert inside the range grows it.
        // ------------------------------------------------------------------
        (OpKind::Delete { len }, OpKind::Insert { text })
        | (OpKind::Retain { len }, OpKind::Insert { text }) => {
            let ins_len = char_len(text);
            if op.position + len <= against.position {
                // unchanged
            } else if op.position >= against.position {
                out.position += ins_len;
            } else {
                out = grow(out, ins_len);
            }
        }

        // ------------------------------------------------------------------
        // Delete/Retain vs Delete: disjoint ranges shift left past the
        // removal; overlapping ranges shrink by the overlap and anchor at
        // the earlier position. A fully covered range vanishes.
        // ------------------------------------------------------------------
        (OpKind::Delete { len }, OpKind::Delete { len: other })
        | (OpKind::Retain { len }, OpKind::Delete { len: other }) => {
            if op.position >= against.position + other {
                out.position -= other;
            } else if op.position + len <= against.position {
                // unchanged
            } else {
                let overlap_start = op.position.max(against.position);
                let overlap_end = (op.position + len).min(against.position + other);
                let overlap = overlap_end - overlap_start;
                let remaining = len - overlap;
                if remaining == 0 {
                    return None;
                }
                out.position = op.position.min(against.position);
                out = resize(out, remaining);
            }
        }

        // Retains never shift the buffer.
        (_, OpKind::Retain { .. }) => {}
    }

    Some(out)
}

/// Transform an incoming batch against every operation already accepted at
/// or above the submitter's base version, oldest first. Fully consumed
/// operations drop out of the batch.
pub fn transform_batch(incoming: &[Operation], accepted: &[Operation]) -> Vec<Operation> {
    incoming
        .iter()
        .filter_map(|op| {
            let mut current = op.clone();
            for prior in accepted {
                match transform_op(&current, prior) {
                    Some(next) => current = next,
                    None => return None,
                }
            }
            Some(current)
        })
        .collect()
}

/// Compress a batch by merging adjacent compatible operations from the same
/// author and dropping empty ones. Applied before broadcast.
pub fn compose(ops: Vec<Operation>) -> Vec<Operation> {
    let mut out: Vec<Operation> = Vec::with_capacity(ops.len());

    for op in ops {
        if op.is_empty() {
            continue;
        }
        let merged = match out.last_mut() {
            Some(prev) if prev.author == op.author => try_merge(prev, &op),
            _ => false,
        };
        if !merged {
            out.push(op);
        }
    }

    out
}

/// Fold `op` into `prev` when the pair is adjacent and of the same kind.
fn try_merge(prev: &mut Operation, op: &Operation) -> bool {
    match (&mut prev.kind, &op.kind) {
        // Consecutive typing: the second insert starts where the first
        // one ended.
        (OpKind::Insert { text }, OpKind::Insert { text: next })
            if op.position == prev.position + char_len(text) =>
        {
            text.push_str(next);
            true
        }
        // Forward delete at the same spot.
        (OpKind::Delete { len }, OpKind::Delete { len: next })
            if op.position == prev.position =>
        {
            *len += next;
            true
        }
        // Backspace run ending where the previous delete began.
        (OpKind::Delete { len }, OpKind::Delete { len: next })
            if op.position + next == prev.position =>
        {
            *len += next;
            prev.position = op.position;
            true
        }
        (OpKind::Retain { len }, OpKind::Retain { len: next })
            if op.position == prev.position + *len =>
        {
            *len += next;
            true
        }
        _ => false,
    }
}

fn grow(mut op: Operation, by: usize) -> Operation {
    match &mut op.kind {
        OpKind::Delete { len } | OpKind::Retain { len } => *len += by,
        OpKind::Insert { .. } => {}
    }
    op
}

fn resize(mut op: Operation, to: usize) -> Operation {
    match &mut op.kind {
        OpKind::Delete { len } | OpKind::Retain { len } => *len = to,
        OpKind::Insert { .. } => {}
    }
    op
}
