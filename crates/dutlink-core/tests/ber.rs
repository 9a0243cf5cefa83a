use dutlink_core::ber::{merge, BerAccumulator, BitErrorCounter};
use pretty_assertions::assert_eq;

fn samples() -> Vec<BitErrorCounter> {
    vec![
        BitErrorCounter::empty(),
        BitErrorCounter::simple(1_000_000, 3),
        BitErrorCounter::simple(u64::MAX - 5, 9),
        BitErrorCounter::split(10, 20, 1, 0),
        BitErrorCounter::split(1_000_000, 999_999, 3, 2),
        BitErrorCounter::split(u64::MAX, u64::MAX - 1, 0, u64::MAX),
    ]
}

#[test]
fn test_merge_is_commutative() {
    for a in samples() {
        for b in samples() {
            assert_eq!(merge(a, b), merge(b, a), "{:?} + {:?}", a, b);
        }
    }
}

#[test]
fn test_merge_is_associative() {
    for a in samples() {
        for b in samples() {
            for c in samples() {
                assert_eq!(merge(a, merge(b, c)), merge(merge(a, b), c));
            }
        }
    }
}

#[test]
fn test_empty_is_identity() {
    for counter in samples() {
        assert_eq!(merge(counter, BitErrorCounter::empty()), counter);
        assert_eq!(merge(BitErrorCounter::empty(), counter), counter);
    }
}

#[test]
fn test_merge_never_decreases() {
    for a in samples() {
        for b in samples() {
            let sum = merge(a, b);
            assert!(sum.compared_bits() >= a.compared_bits());
            assert!(sum.errored_bits() >= a.errored_bits());
        }
    }
}

#[test]
fn test_long_run_saturates_instead_of_wrapping() {
    let mut acc = BerAccumulator::new();
    let huge = BitErrorCounter::split(u64::MAX / 3, u64::MAX / 3, 1, 1);
    for _ in 0..10 {
        acc.record("Lane1", huge);
    }
    assert_eq!(
        acc.total(),
        BitErrorCounter::split(u64::MAX, u64::MAX, 10, 10)
    );
    assert_eq!(acc.total().compared_bits(), u64::MAX);
}

#[test]
fn test_zero_delta_is_noop() {
    let mut acc = BerAccumulator::new();
    acc.record("Lane1", BitErrorCounter::split(10, 20, 1, 0));
    let reading = acc.record("Lane1", BitErrorCounter::empty());
    assert_eq!(reading.total, BitErrorCounter::split(10, 20, 1, 0));
}
