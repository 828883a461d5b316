use std::cmp::Reverse;

use rand::{seq::SliceRandom, Rng};
use slice_group_by::GroupBy;

use crate::solution::{FacilityId, FixedSet, Solution};

/// Fix the `size` facilities whose state in `base` is shared by the most members of `sample`, each to its
/// state in `base`. When several facilities tie at the cut, the ones to fix are drawn uniformly among
/// them, so exactly `min(size, facilities)` facilities are fixed.
pub fn build_fixed_set<R>(base: &Solution, sample: &[&Solution], size: usize, rng: &mut R) -> FixedSet
where
    R: Rng + ?Sized,
{
    let pattern = base.pattern();

    let mut scores = pattern
        .facilities()
        .map(|(facility, open)| {
            let agreement = sample
                .iter()
                .filter(|s| s.pattern().is_open(facility) == open)
                .count();
            (agreement, facility)
        })
        .collect::<Vec<_>>();

    scores.sort_by_key(|&(agreement, _)| Reverse(agreement));

    let size = size.min(scores.len());
    let mut chosen: Vec<FacilityId> = Vec::with_capacity(size);

    for group in scores.linear_group_by_key(|&(agreement, _)| agreement) {
        let needed = size - chosen.len();
        if needed == 0 {
            break;
        }

        if group.len() <= needed {
            chosen.extend(group.iter().map(|&(_, facility)| facility));
        } else {
            chosen.extend(
                group
                    .choose_multiple(rng, needed)
                    .map(|&(_, facility)| facility),
            );
        }
    }

    chosen
        .into_iter()
        .map(|facility| (facility, pattern.is_open(facility)))
        .collect()
}
