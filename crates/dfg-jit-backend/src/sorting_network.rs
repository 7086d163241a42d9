//! Fixed-size sorting networks for short register-state sequences.
//!
//! The register-bank allocator (C5) needs to rank its live registers by
//! next-use on every codegen decision. A branch-free sorting network beats
//! a general sort for the small, fixed sizes involved (at most 16 registers
//! per bank). Networks below are the depth-optimal ones from
//! <https://bertdobbelaere.github.io/sorting_networks.html>.

#[inline(always)]
fn do_cmp<T: PartialOrd + Copy>(ascend: bool, a: &mut [T], i: usize, j: usize) {
    let cond = if ascend { a[i] <= a[j] } else { a[i] >= a[j] };
    if !cond {
        a.swap(i, j);
    }
}

/// Sort `a` in place into ascending order using a fixed sorting network.
/// `a.len()` must be in `2..=16`.
pub fn sort_ascend<T: PartialOrd + Copy>(a: &mut [T]) {
    sort_impl(a, true);
}

/// Sort `a` in place into descending order using a fixed sorting network.
/// `a.len()` must be in `2..=16`.
pub fn sort_descend<T: PartialOrd + Copy>(a: &mut [T]) {
    sort_impl(a, false);
}

fn sort_impl<T: PartialOrd + Copy>(a: &mut [T], ascend: bool) {
    let n = a.len();
    if n < 2 {
        return;
    }
    let net = network_for(n);
    for &(i, j) in net {
        do_cmp(ascend, a, i as usize, j as usize);
    }
    debug_assert!(is_sorted(a, ascend));
}

fn is_sorted<T: PartialOrd + Copy>(a: &[T], ascend: bool) -> bool {
    a.windows(2).all(|w| if ascend { w[0] <= w[1] } else { w[0] >= w[1] })
}

fn network_for(n: usize) -> &'static [(u8, u8)] {
    match n {
        2 => &NET_2,
        3 => &NET_3,
        4 => &NET_4,
        5 => &NET_5,
        6 => &NET_6,
        7 => &NET_7,
        8 => &NET_8,
        9 => &NET_9,
        10 => &NET_10,
        11 => &NET_11,
        12 => &NET_12,
        13 => &NET_13,
        14 => &NET_14,
        15 => &NET_15,
        16 => &NET_16,
        _ => panic!("sorting network only supports 2..=16 elements, got {n}"),
    }
}

static NET_2: [(u8, u8); 1] = [(0, 1)];

static NET_3: [(u8, u8); 3] = [(0, 2), (0, 1), (1, 2)];

static NET_4: [(u8, u8); 5] = [(0, 2), (1, 3), (0, 1), (2, 3), (1, 2)];

static NET_5: [(u8, u8); 9] = [
    (0, 3), (1, 4), (0, 2), (1, 3), (0, 1), (2, 4), (1, 2), (3, 4), (2, 3),
];

static NET_6: [(u8, u8); 12] = [
    (0, 5), (1, 3), (2, 4),
    (1, 2), (3, 4),
    (0, 3), (2, 5),
    (0, 1), (2, 3), (4, 5),
    (1, 2), (3, 4),
];

static NET_7: [(u8, u8); 16] = [
    (0, 6), (2, 3), (4, 5),
    (0, 2), (1, 4), (3, 6),
    (0, 1), (2, 5), (3, 4),
    (1, 2), (4, 6),
    (2, 3), (4, 5),
    (1, 2), (3, 4), (5, 6),
];

static NET_8: [(u8, u8); 19] = [
    (0, 2), (1, 3), (4, 6), (5, 7),
    (0, 4), (1, 5), (2, 6), (3, 7),
    (0, 1), (2, 3), (4, 5), (6, 7),
    (2, 4), (3, 5),
    (1, 4), (3, 6),
    (1, 2), (3, 4), (5, 6),
];

static NET_9: [(u8, u8); 25] = [
    (0, 3), (1, 7), (2, 5), (4, 8),
    (0, 7), (2, 4), (3, 8), (5, 6),
    (0, 2), (1, 3), (4, 5), (7, 8),
    (1, 4), (3, 6), (5, 7),
    (0, 1), (2, 4), (3, 5), (6, 8),
    (2, 3), (4, 5), (6, 7),
    (1, 2), (3, 4), (5, 6),
];

static NET_10: [(u8, u8); 29] = [
    (0, 8), (1, 9), (2, 7), (3, 5), (4, 6),
    (0, 2), (1, 4), (5, 8), (7, 9),
    (0, 3), (2, 4), (5, 7), (6, 9),
    (0, 1), (3, 6), (8, 9),
    (1, 5), (2, 3), (4, 8), (6, 7),
    (1, 2), (3, 5), (4, 6), (7, 8),
    (2, 3), (4, 5), (6, 7),
    (3, 4), (5, 6),
];

static NET_11: [(u8, u8); 35] = [
    (0, 9), (1, 6), (2, 4), (3, 7), (5, 8),
    (0, 1), (3, 5), (4, 10), (6, 9), (7, 8),
    (1, 3), (2, 5), (4, 7), (8, 10),
    (0, 4), (1, 2), (3, 7), (5, 9), (6, 8),
    (0, 1), (2, 6), (4, 5), (7, 8), (9, 10),
    (2, 4), (3, 6), (5, 7), (8, 9),
    (1, 2), (3, 4), (5, 6), (7, 8),
    (2, 3), (4, 5), (6, 7),
];

static NET_12: [(u8, u8); 40] = [
    (0, 8), (1, 7), (2, 6), (3, 11), (4, 10), (5, 9),
    (0, 1), (2, 5), (3, 4), (6, 9), (7, 8), (10, 11),
    (0, 2), (1, 6), (5, 10), (9, 11),
    (0, 3), (1, 2), (4, 6), (5, 7), (8, 11), (9, 10),
    (1, 4), (3, 5), (6, 8), (7, 10),
    (1, 3), (2, 5), (6, 9), (8, 10),
    (2, 3), (4, 5), (6, 7), (8, 9),
    (4, 6), (5, 7),
    (3, 4), (5, 6), (7, 8),
];

static NET_13: [(u8, u8); 47] = [
    (0, 12), (1, 10), (2, 9), (3, 7), (5, 11), (6, 8),
    (1, 6), (2, 3), (4, 11), (7, 9), (8, 10),
    (0, 4), (1, 2), (3, 6), (7, 8), (9, 10), (11, 12),
    (4, 6), (5, 9), (8, 11), (10, 12),
    (0, 5), (3, 8), (4, 7), (6, 11), (9, 10),
    (0, 1), (2, 5), (6, 9), (7, 8), (10, 11),
    (1, 3), (2, 4), (5, 6), (9, 10),
    (1, 2), (3, 4), (5, 7), (6, 8),
    (2, 3), (4, 5), (6, 7), (8, 9),
    (3, 4), (5, 6),
];

static NET_14: [(u8, u8); 51] = [
    (0, 1), (2, 3), (4, 5), (6, 7), (8, 9), (10, 11), (12, 13),
    (0, 2), (1, 3), (4, 8), (5, 9), (10, 12), (11, 13),
    (0, 4), (1, 2), (3, 7), (5, 8), (6, 10), (9, 13), (11, 12),
    (0, 6), (1, 5), (3, 9), (4, 10), (7, 13), (8, 12),
    (2, 10), (3, 11), (4, 6), (7, 9),
    (1, 3), (2, 8), (5, 11), (6, 7), (10, 12),
    (1, 4), (2, 6), (3, 5), (7, 11), (8, 10), (9, 12),
    (2, 4), (3, 6), (5, 8), (7, 10), (9, 11),
    (3, 4), (5, 6), (7, 8), (9, 10),
    (6, 7),
];

static NET_15: [(u8, u8); 56] = [
    (1, 2), (3, 10), (4, 14), (5, 8), (6, 13), (7, 12), (9, 11),
    (0, 14), (1, 5), (2, 8), (3, 7), (6, 9), (10, 12), (11, 13),
    (0, 7), (1, 6), (2, 9), (4, 10), (5, 11), (8, 13), (12, 14),
    (0, 6), (2, 4), (3, 5), (7, 11), (8, 10), (9, 12), (13, 14),
    (0, 3), (1, 2), (4, 7), (5, 9), (6, 8), (10, 11), (12, 13),
    (0, 1), (2, 3), (4, 6), (7, 9), (10, 12), (11, 13),
    (1, 2), (3, 5), (8, 10), (11, 12),
    (3, 4), (5, 6), (7, 8), (9, 10),
    (2, 3), (4, 5), (6, 7), (8, 9), (10, 11),
    (5, 6), (7, 8),
];

static NET_16: [(u8, u8); 60] = [
    (0, 13), (1, 12), (2, 15), (3, 14), (4, 8), (5, 6), (7, 11), (9, 10),
    (0, 5), (1, 7), (2, 9), (3, 4), (6, 13), (8, 14), (10, 15), (11, 12),
    (0, 1), (2, 3), (4, 5), (6, 8), (7, 9), (10, 11), (12, 13), (14, 15),
    (0, 2), (1, 3), (4, 10), (5, 11), (6, 7), (8, 9), (12, 14), (13, 15),
    (1, 2), (3, 12), (4, 6), (5, 7), (8, 10), (9, 11), (13, 14),
    (1, 4), (2, 6), (5, 8), (7, 10), (9, 13), (11, 14),
    (2, 4), (3, 6), (9, 12), (11, 13),
    (3, 5), (6, 8), (7, 9), (10, 12),
    (3, 4), (5, 6), (7, 8), (9, 10), (11, 12),
    (6, 7), (8, 9),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn is_permutation(before: &[i32], after: &[i32]) -> bool {
        let mut b = before.to_vec();
        let mut a = after.to_vec();
        b.sort();
        a.sort();
        a == b
    }

    #[test]
    fn all_sizes_sort_correctly() {
        let mut rng_state: u64 = 0x2545F4914F6CDD1D;
        let mut next = move || {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            (rng_state % 1000) as i32
        };

        for n in 2..=16usize {
            for _ in 0..50 {
                let input: Vec<i32> = (0..n).map(|_| next()).collect();

                let mut asc = input.clone();
                sort_ascend(&mut asc);
                assert!(is_permutation(&input, &asc));
                assert!(asc.windows(2).all(|w| w[0] <= w[1]), "n={n} asc={asc:?}");

                let mut desc = input.clone();
                sort_descend(&mut desc);
                assert!(is_permutation(&input, &desc));
                assert!(desc.windows(2).all(|w| w[0] >= w[1]), "n={n} desc={desc:?}");
            }
        }
    }

    #[test]
    fn already_sorted_is_noop() {
        let mut a = [1, 2, 3, 4, 5];
        sort_ascend(&mut a);
        assert_eq!(a, [1, 2, 3, 4, 5]);
    }

    #[test]
    #[should_panic]
    fn rejects_too_large() {
        let mut a = [0i32; 17];
        sort_ascend(&mut a);
    }
}
