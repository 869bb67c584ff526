//! Assertions for shuffled and sampled streams.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Assert that two collections hold the same elements with the same
/// multiplicities, ignoring order.
///
/// # Panics
///
/// Panics if the collections differ in length or content.
///
/// # Example
///
/// ```
/// use tfrecord_loader::testing::assert_same_multiset;
///
/// assert_same_multiset(&[3, 1, 2, 1], &[1, 1, 2, 3]);
/// ```
pub fn assert_same_multiset<T: Debug + Eq + Hash>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Collection length mismatch:\n  Expected length: {}\n  Actual length: {}",
        expected.len(),
        actual.len()
    );

    let mut counts: HashMap<&T, isize> = HashMap::new();
    for item in expected {
        *counts.entry(item).or_default() += 1;
    }
    for item in actual {
        *counts.entry(item).or_default() -= 1;
    }

    let mut missing = Vec::new();
    let mut extra = Vec::new();
    for (item, count) in counts {
        if count > 0 {
            missing.push((item, count));
        } else if count < 0 {
            extra.push((item, -count));
        }
    }
    assert!(
        missing.is_empty() && extra.is_empty(),
        "Collection content mismatch:\n  Missing (element, count): {missing:?}\n  Extra (element, count): {extra:?}"
    );
}

/// Assert that the share of `items` matching `predicate` is within
/// `tolerance` of `expected`.
///
/// # Panics
///
/// Panics if `items` is empty or the observed share is out of tolerance.
///
/// # Example
///
/// ```
/// use tfrecord_loader::testing::assert_proportion_near;
///
/// let draws = [true, true, true, false];
/// assert_proportion_near(&draws, |&b| b, 0.75, 0.01);
/// ```
#[allow(clippy::cast_precision_loss)]
pub fn assert_proportion_near<T, F>(items: &[T], predicate: F, expected: f64, tolerance: f64)
where
    F: Fn(&T) -> bool,
{
    assert!(!items.is_empty(), "cannot take a proportion of nothing");
    let hits = items.iter().filter(|item| predicate(item)).count();
    let observed = hits as f64 / items.len() as f64;
    assert!(
        (observed - expected).abs() <= tolerance,
        "Proportion out of tolerance:\n  Expected: {expected} ± {tolerance}\n  Observed: {observed} ({hits} of {})",
        items.len()
    );
}
