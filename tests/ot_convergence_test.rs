//! Convergence and arithmetic laws of the edit transformation layer.

use codecollab::ot::{
    apply, apply_batch, char_len, compose, length_delta, transform_batch, transform_op, EditOp,
    Operation, OpKind,
};
use proptest::prelude::*;
use uuid::Uuid;

fn uid(n: u8) -> Uuid {
    Uuid::from_bytes([n; 16])
}

fn ins(pos: usize, text: &str, author: u8, ts: u64) -> Operation {
    Operation::insert(pos, text.to_string(), uid(author), ts)
}

fn del(pos: usize, len: usize, author: u8, ts: u64) -> Operation {
    Operation::delete(pos, len, uid(author), ts)
}

/// Serialize two concurrent batches the way the hub does: the first
/// arrival applies untouched, the second is transformed against it.
fn serialize(buffer: &str, first: &[Operation], second: &[Operation]) -> String {
    let after_first = apply_batch(buffer, first).expect("first batch applies");
    let transformed = transform_batch(second, first);
    apply_batch(&after_first, &transformed).expect("transformed batch applies")
}

#[test]
fn concurrent_inserts_at_origin_converge() {
    // Two participants type at position 0 against version 0; the earlier
    // timestamp wins the left slot.
    let u1 = vec![ins(0, "hi", 1, 1)];
    let u2 = vec![ins(0, "HI", 2, 2)];

    assert_eq!(serialize("", &u1, &u2), "hiHI");
    // Arrival order does not change the outcome because the tie-break is
    // by timestamp, not arrival.
    assert_eq!(serialize("", &u2, &u1), "hiHI");
}

#[test]
fn disjoint_batches_satisfy_the_convergence_law() {
    let buffer = "abcdefgh";
    let a = vec![ins(1, "X", 1, 1)];
    let b = vec![del(5, 2, 2, 2)];

    let ab = serialize(buffer, &a, &b);
    let ba = serialize(buffer, &b, &a);
    assert_eq!(ab, ba);
    assert_eq!(ab, "aXbcdeh");
}

#[test]
fn overlapping_deletes_converge() {
    let buffer = "abcdef";
    let a = vec![del(1, 3, 1, 1)];
    let b = vec![del(2, 3, 2, 2)];

    assert_eq!(serialize(buffer, &a, &b), "af");
    assert_eq!(serialize(buffer, &b, &a), "af");
}

#[test]
fn length_arithmetic_holds_for_transformed_batches() {
    let buffer = "fn main() { println!(); }";
    let accepted = vec![ins(3, "xx", 1, 1), del(10, 4, 1, 2)];
    let incoming = vec![ins(0, "// ", 2, 3), del(5, 2, 2, 4)];

    let after_accepted = apply_batch(buffer, &accepted).unwrap();
    let transformed = transform_batch(&incoming, &accepted);
    let after_all = apply_batch(&after_accepted, &transformed).unwrap();

    let expected =
        char_len(&after_accepted) as i64 + length_delta(&transformed);
    assert_eq!(char_len(&after_all) as i64, expected);
}

#[test]
fn retain_does_not_shift_the_buffer() {
    let buffer = "abcdef";
    let retain = Operation::retain(1, 3, uid(1), 1);
    assert_eq!(apply(buffer, &retain).unwrap(), buffer);
    assert_eq!(length_delta(std::slice::from_ref(&retain)), 0);

    // Peers transformed against a retain are untouched.
    let peer = ins(2, "Z", 2, 2);
    assert_eq!(transform_op(&peer, &retain).unwrap(), peer);
}

#[test]
fn out_of_bounds_batches_are_rejected_whole() {
    let ops = vec![ins(0, "ok", 1, 1), del(40, 2, 1, 2)];
    assert!(apply_batch("short", &ops).is_err());
}

#[test]
fn composition_preserves_semantics_and_shrinks() {
    let typing: Vec<Operation> = "hello"
        .chars()
        .enumerate()
        .map(|(i, c)| ins(i, &c.to_string(), 1, i as u64 + 1))
        .collect();

    let composed = compose(typing.clone());
    assert_eq!(composed.len(), 1);
    assert_eq!(
        apply_batch("", &typing).unwrap(),
        apply_batch("", &composed).unwrap()
    );
}

#[test]
fn wire_ops_survive_stamping() {
    let wire = vec![
        EditOp::Insert {
            position: 0,
            text: "let x = 1;".into(),
        },
        EditOp::Delete {
            position: 4,
            length: 1,
        },
    ];
    let ops: Vec<Operation> = wire
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, op)| op.into_operation(uid(1), i as u64))
        .collect();
    let back: Vec<EditOp> = ops.iter().map(EditOp::from).collect();
    assert_eq!(back, wire);
}

proptest! {
    /// Server-serialized application never diverges between replicas: for
    /// random concurrent single-op batches on a shared base, every replica
    /// that applies (first, transform(second)) ends with the same buffer.
    #[test]
    fn prop_serialized_application_is_deterministic(
        base in "[a-z]{0,20}",
        pos_a in 0usize..20,
        pos_b in 0usize..20,
        text_a in "[A-Z]{1,4}",
        text_b in "[A-Z]{1,4}",
    ) {
        let len = char_len(&base);
        let a = vec![ins(pos_a.min(len), &text_a, 1, 1)];
        let b = vec![ins(pos_b.min(len), &text_b, 2, 2)];

        // Both serialization orders agree for insert/insert because the
        // tie-break is positional and timestamp-driven.
        let ab = serialize(&base, &a, &b);
        let ba = serialize(&base, &b, &a);
        prop_assert_eq!(&ab, &ba);

        // The merged buffer contains both inserts and every base char.
        prop_assert_eq!(char_len(&ab), len + char_len(&text_a) + char_len(&text_b));
    }

    /// Deletes transformed against concurrent deletes never reach outside
    /// the buffer.
    #[test]
    fn prop_transformed_deletes_stay_in_bounds(
        base in "[a-z]{5,30}",
        pos_a in 0usize..25,
        len_a in 1usize..6,
        pos_b in 0usize..25,
        len_b in 1usize..6,
    ) {
        let total = char_len(&base);
        let pos_a = pos_a.min(total.saturating_sub(1));
        let pos_b = pos_b.min(total.saturating_sub(1));
        let len_a = len_a.min(total - pos_a);
        let len_b = len_b.min(total - pos_b);
        prop_assume!(len_a > 0 && len_b > 0);

        let a = del(pos_a, len_a, 1, 1);
        let b = del(pos_b, len_b, 2, 2);

        let after_a = apply(&base, &a).unwrap();
        if let Some(b2) = transform_op(&b, &a) {
            let out = apply(&after_a, &b2);
            prop_assert!(out.is_ok(), "transformed delete out of bounds: {:?}", b2);
        }
    }
}

#[test]
fn delete_kind_invariants() {
    // Transform never produces zero-length deletes; fully covered ops
    // disappear instead.
    let inner = del(2, 2, 1, 1);
    let outer = del(0, 10, 2, 2);
    assert!(transform_op(&inner, &outer).is_none());

    let partial = del(0, 4, 1, 1);
    let other = del(2, 4, 2, 2);
    let t = transform_op(&partial, &other).unwrap();
    match t.kind {
        OpKind::Delete { len } => assert!(len > 0),
        ref other => panic!("expected delete, got {other:?}"),
    }
}
