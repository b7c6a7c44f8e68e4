//! Weighted selection over a candidate pool list.
//!
//! Builds a prefix-sum spectrum over positive weights and picks the entry
//! whose interval contains a uniform draw in `[0, total_weight)`. Entries
//! with zero or negative weight are never selected; an empty spectrum yields
//! `None`, which callers surface as `NoPoolFound`.

use rand::Rng;

/// Picks from `entries` with probability proportional to `weight_of`.
pub fn weighted<'a, T, F>(entries: &'a [T], weight_of: F) -> Option<&'a T>
where
    F: Fn(&T) -> i64,
{
    weighted_with(entries, weight_of, &mut rand::thread_rng())
}

/// `weighted` with an injectable generator, so tests can seed the draw.
pub fn weighted_with<'a, T, F, R>(entries: &'a [T], weight_of: F, rng: &mut R) -> Option<&'a T>
where
    F: Fn(&T) -> i64,
    R: Rng + ?Sized,
{
    let mut acc: i64 = 0;
    let mut spectrum = Vec::with_capacity(entries.len());

    for entry in entries {
        let weight = weight_of(entry);
        if weight <= 0 {
            continue;
        }
        acc += weight;
        spectrum.push((entry, acc));
    }

    if spectrum.is_empty() {
        return None;
    }

    let draw = rng.gen_range(0..acc);
    let mut lower = 0;
    for (entry, upper) in spectrum {
        if lower <= draw && draw < upper {
            return Some(entry);
        }
        lower = upper;
    }

    unreachable!("draw is always inside the spectrum")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn empty_and_weightless_lists_yield_none() {
        let none: &[(&str, i64)] = &[];
        assert!(weighted(none, |e| e.1).is_none());

        let zeroed = [("a", 0), ("b", -3)];
        assert!(weighted(&zeroed, |e| e.1).is_none());
    }

    #[test]
    fn single_positive_weight_always_wins() {
        let entries = [("dead", 0), ("live", 7)];
        for _ in 0..50 {
            assert_eq!(weighted(&entries, |e| e.1).unwrap().0, "live");
        }
    }

    #[test]
    fn shares_converge_to_the_weight_ratio() {
        let entries = [("light", 1), ("heavy", 99)];
        let mut rng = StdRng::seed_from_u64(42);

        let mut heavy = 0usize;
        let draws = 10_000;
        for _ in 0..draws {
            if weighted_with(&entries, |e| e.1, &mut rng).unwrap().0 == "heavy" {
                heavy += 1;
            }
        }

        // Expect ~9_900; allow generous variance for the seeded stream.
        assert!((9_700..=9_995).contains(&heavy), "heavy won {heavy}");
    }
}
