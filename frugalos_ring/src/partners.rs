//! The partner relation over fragment indices.
//!
//! Fragment indices of a partition are arranged on a circle: the partners of an
//! index are its left and right neighbors. The relation depends only on the
//! index and the number of slots, so every reconstructor computes the same
//! partners without coordination.

fn left_of(index: usize, len: usize) -> usize {
    (index + len - 1) % len
}

fn right_of(index: usize, len: usize) -> usize {
    (index + 1) % len
}

/// Returns the partner indices of `index` in a partition whose slots are `slots`.
///
/// The result never contains `index` itself. For two or more slots it holds at
/// least one index; the left neighbor comes first.
pub fn partners_of<T>(index: usize, slots: &[T]) -> Vec<usize> {
    let len = slots.len();
    if len < 2 || index >= len {
        return Vec::new();
    }
    let left = left_of(index, len);
    let right = right_of(index, len);
    if left == right {
        vec![left]
    } else {
        vec![left, right]
    }
}

/// Returns the indices that stand in for unavailable partners of `index`.
///
/// The chain lists every index of `slots` in ring order (from `0`), leaving out
/// `index` and its partners. When `k` partners are down, the first `k`
/// available indices of the chain take over their work.
pub fn fallback_chain<T>(index: usize, slots: &[T]) -> Vec<usize> {
    if index >= slots.len() {
        return Vec::new();
    }
    let partners = partners_of(index, slots);
    (0..slots.len())
        .filter(|&i| i != index && !partners.contains(&i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partners_never_include_the_index_itself() {
        for len in 2..12 {
            let slots = vec![(); len];
            for i in 0..len {
                let partners = partners_of(i, &slots);
                assert!(!partners.is_empty(), "len={}, index={}", len, i);
                assert!(!partners.contains(&i), "len={}, index={}", len, i);
            }
        }
    }

    #[test]
    fn partners_are_neighbors() {
        let slots = vec![(); 6];
        assert_eq!(partners_of(0, &slots), vec![5, 1]);
        assert_eq!(partners_of(3, &slots), vec![2, 4]);
        assert_eq!(partners_of(5, &slots), vec![4, 0]);

        let slots = vec![(); 2];
        assert_eq!(partners_of(0, &slots), vec![1]);
        assert_eq!(partners_of(1, &slots), vec![0]);
    }

    #[test]
    fn partner_relation_is_symmetric_and_stable() {
        let slots = vec![(); 7];
        for i in 0..slots.len() {
            for &j in &partners_of(i, &slots) {
                assert!(partners_of(j, &slots).contains(&i));
            }
            assert_eq!(partners_of(i, &slots), partners_of(i, &slots));
        }
    }

    #[test]
    fn degenerate_inputs_have_no_partners() {
        assert!(partners_of(0, &[()]).is_empty());
        assert!(partners_of(3, &[(), ()]).is_empty());
        assert!(partners_of::<()>(0, &[]).is_empty());
    }

    #[test]
    fn fallback_chain_follows_ring_order() {
        let slots = vec![(); 6];
        assert_eq!(fallback_chain(3, &slots), vec![0, 1, 5]);
        assert_eq!(fallback_chain(5, &slots), vec![1, 2, 3]);
        assert_eq!(fallback_chain(0, &slots), vec![2, 3, 4]);
    }

    #[test]
    fn fallback_chain_excludes_the_index_and_its_partners() {
        for len in 1..12 {
            let slots = vec![(); len];
            for i in 0..len {
                let partners = partners_of(i, &slots);
                let chain = fallback_chain(i, &slots);
                assert_eq!(chain.len() + partners.len() + 1, len);
                assert!(!chain.contains(&i));
                assert!(chain.iter().all(|c| !partners.contains(c)));
                assert!(chain.windows(2).all(|w| w[0] < w[1]));
            }
        }
        assert!(fallback_chain(6, &[(); 6]).is_empty());
        assert!(fallback_chain(1, &[(), (), ()]).is_empty());
    }
}
