//! Set algebra over sorted-unique id slices.

/// Switch to galloping when the larger side is at least this many times the
/// smaller one.
pub const GALLOP_SKEW: usize = 16;

/// Intersection of two sorted-unique slices. Picks a galloping probe when the
/// operand sizes are highly skewed, a linear merge otherwise.
pub fn intersect(a: &[u32], b: &[u32]) -> Vec<u32> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if large.len() >= small.len().saturating_mul(GALLOP_SKEW) {
        gallop_intersect(small, large)
    } else {
        merge_intersect(a, b)
    }
}

fn merge_intersect(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut result = Vec::with_capacity(a.len().min(b.len()));
    let mut i = 0;
    let mut j = 0;

    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            i += 1;
        } else if a[i] > b[j] {
            j += 1;
        } else {
            result.push(a[i]);
            i += 1;
            j += 1;
        }
    }

    result
}

/// For each element of `small`, exponentially probe `large` from the current
/// cursor, then binary-search inside the probed window.
fn gallop_intersect(small: &[u32], large: &[u32]) -> Vec<u32> {
    let mut result = Vec::with_capacity(small.len());
    let mut base = 0;

    for &x in small {
        if base >= large.len() {
            break;
        }

        let mut bound = 1;
        while base + bound < large.len() && large[base + bound] < x {
            bound <<= 1;
        }

        let lo = base + (bound >> 1);
        let hi = (base + bound + 1).min(large.len());
        match large[lo..hi].binary_search(&x) {
            Ok(pos) => {
                result.push(x);
                base = lo + pos + 1;
            }
            Err(pos) => {
                base = lo + pos;
            }
        }
    }

    result
}

/// Merge union preserving ordering and uniqueness.
pub fn union(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut result = Vec::with_capacity(a.len() + b.len());
    let mut i = 0;
    let mut j = 0;

    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            result.push(a[i]);
            i += 1;
        } else if a[i] > b[j] {
            result.push(b[j]);
            j += 1;
        } else {
            result.push(a[i]);
            i += 1;
            j += 1;
        }
    }

    result.extend_from_slice(&a[i..]);
    result.extend_from_slice(&b[j..]);
    result
}

/// Elements of `a` absent from `b`.
pub fn subtract(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut result = Vec::with_capacity(a.len());
    let mut i = 0;
    let mut j = 0;

    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            result.push(a[i]);
            i += 1;
        } else if a[i] > b[j] {
            j += 1;
        } else {
            i += 1;
            j += 1;
        }
    }

    result.extend_from_slice(&a[i..]);
    result
}

/// Intersection cardinality without materializing the result.
pub fn intersect_count(a: &[u32], b: &[u32]) -> u64 {
    let mut count = 0;
    let mut i = 0;
    let mut j = 0;

    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            i += 1;
        } else if a[i] > b[j] {
            j += 1;
        } else {
            count += 1;
            i += 1;
            j += 1;
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn random_set(rng: &mut StdRng, len: usize, max: u32) -> Vec<u32> {
        let mut set = BTreeSet::new();
        while set.len() < len {
            set.insert(rng.gen_range(0..max));
        }
        set.into_iter().collect()
    }

    #[test]
    fn intersect_basic() {
        assert_eq!(intersect(&[1, 3, 5, 7], &[2, 3, 7, 9]), vec![3, 7]);
        assert_eq!(intersect(&[], &[1, 2]), Vec::<u32>::new());
        assert_eq!(intersect(&[1, 2], &[]), Vec::<u32>::new());
    }

    #[test]
    fn union_and_subtract_basic() {
        assert_eq!(union(&[1, 3], &[2, 3, 4]), vec![1, 2, 3, 4]);
        assert_eq!(subtract(&[1, 2, 3, 4], &[2, 4]), vec![1, 3]);
        assert_eq!(subtract(&[], &[1]), Vec::<u32>::new());
        assert_eq!(union(&[5], &[]), vec![5]);
    }

    #[test]
    fn gallop_matches_merge() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let small = random_set(&mut rng, 30, 1_000_000);
            let large = random_set(&mut rng, 30 * GALLOP_SKEW + 100, 1_000_000);

            let expected = merge_intersect(&small, &large);
            assert_eq!(gallop_intersect(&small, &large), expected);
            assert_eq!(intersect(&small, &large), expected);
            assert_eq!(intersect(&large, &small), expected);
        }
    }

    #[test]
    fn gallop_handles_shared_elements_at_edges() {
        let small = vec![0, 999_999];
        let large: Vec<u32> = (0..100_000).map(|i| i * 10).collect();
        let expected = merge_intersect(&small, &large);
        assert_eq!(gallop_intersect(&small, &large), expected);
    }

    #[test]
    fn intersect_count_agrees_with_intersect() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10 {
            let a = random_set(&mut rng, 200, 5_000);
            let b = random_set(&mut rng, 300, 5_000);
            assert_eq!(intersect_count(&a, &b), intersect(&a, &b).len() as u64);
        }
    }

    #[test]
    fn results_stay_sorted_unique() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = random_set(&mut rng, 500, 10_000);
        let b = random_set(&mut rng, 400, 10_000);
        for out in [intersect(&a, &b), union(&a, &b), subtract(&a, &b)] {
            assert!(out.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
