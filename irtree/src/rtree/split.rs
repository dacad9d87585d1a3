//! Node split policies and the R* reinsertion pick.
//!
//! All three policies operate on the overflowing entry set (capacity + 1
//! entries) and return two non-empty groups that partition it.

use crate::geometry::{Point, Region};

use super::node::Entry;
use super::tree::TreeVariant;

/// Splits an overflowing entry set according to the tree variant.
pub(crate) fn split_entries(
    variant: TreeVariant,
    entries: Vec<Entry>,
    min_fill: usize,
    split_distribution_factor: f64,
    dimension: usize,
) -> (Vec<Entry>, Vec<Entry>) {
    match variant {
        TreeVariant::Linear => guttman_split(entries, min_fill, dimension, SeedPolicy::Linear),
        TreeVariant::Quadratic => {
            guttman_split(entries, min_fill, dimension, SeedPolicy::Quadratic)
        }
        TreeVariant::Rstar => rstar_split(entries, split_distribution_factor, dimension),
    }
}

/// Picks the `count` entries farthest from `center` for forced
/// reinsertion, removing them from `entries`. Ties break by id so the
/// selection is deterministic.
pub(crate) fn take_farthest(entries: &mut Vec<Entry>, center: &Point, count: usize) -> Vec<Entry> {
    entries.sort_by(|a, b| {
        let da = a.mbr.center().distance(center);
        let db = b.mbr.center().distance(center);
        da.total_cmp(&db).then_with(|| a.id.cmp(&b.id))
    });
    let keep = entries.len().saturating_sub(count);
    entries.split_off(keep)
}

fn bounding_region(entries: &[Entry], dimension: usize) -> Region {
    let mut mbr = Region::infinite(dimension);
    for entry in entries {
        mbr.expand(&entry.mbr);
    }
    mbr
}

enum SeedPolicy {
    Linear,
    Quadratic,
}

/// Guttman split: seed selection per policy, then greedy distribution by
/// minimum enlargement with the fill-factor floor enforced.
fn guttman_split(
    entries: Vec<Entry>,
    min_fill: usize,
    dimension: usize,
    policy: SeedPolicy,
) -> (Vec<Entry>, Vec<Entry>) {
    let (seed_a, seed_b) = match policy {
        SeedPolicy::Linear => linear_pick_seeds(&entries, dimension),
        SeedPolicy::Quadratic => quadratic_pick_seeds(&entries),
    };

    let mut remaining: Vec<Entry> = Vec::with_capacity(entries.len());
    let mut group_a: Vec<Entry> = Vec::new();
    let mut group_b: Vec<Entry> = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        if index == seed_a {
            group_a.push(entry);
        } else if index == seed_b {
            group_b.push(entry);
        } else {
            remaining.push(entry);
        }
    }

    let mut mbr_a = bounding_region(&group_a, dimension);
    let mut mbr_b = bounding_region(&group_b, dimension);

    while let Some(pick) = pick_next(&remaining, &mbr_a, &mbr_b, &policy) {
        // Once one group must absorb everything left to reach the minimum
        // fill, stop choosing.
        if group_a.len() + remaining.len() == min_fill {
            for entry in remaining.drain(..) {
                mbr_a.expand(&entry.mbr);
                group_a.push(entry);
            }
            break;
        }
        if group_b.len() + remaining.len() == min_fill {
            for entry in remaining.drain(..) {
                mbr_b.expand(&entry.mbr);
                group_b.push(entry);
            }
            break;
        }

        let entry = remaining.remove(pick);
        let enlargement_a = mbr_a.enlargement(&entry.mbr);
        let enlargement_b = mbr_b.enlargement(&entry.mbr);

        let into_a = enlargement_a < enlargement_b
            || (enlargement_a == enlargement_b
                && (mbr_a.area() < mbr_b.area()
                    || (mbr_a.area() == mbr_b.area() && group_a.len() <= group_b.len())));

        if into_a {
            mbr_a.expand(&entry.mbr);
            group_a.push(entry);
        } else {
            mbr_b.expand(&entry.mbr);
            group_b.push(entry);
        }
    }

    (group_a, group_b)
}

/// Index of the next entry to distribute, or `None` when nothing remains.
fn pick_next(
    remaining: &[Entry],
    mbr_a: &Region,
    mbr_b: &Region,
    policy: &SeedPolicy,
) -> Option<usize> {
    if remaining.is_empty() {
        return None;
    }
    match policy {
        // Linear split assigns in arrival order.
        SeedPolicy::Linear => Some(0),
        // Quadratic split prefers the entry with the strongest preference
        // for one group.
        SeedPolicy::Quadratic => {
            let mut best = 0;
            let mut best_diff = f64::NEG_INFINITY;
            for (index, entry) in remaining.iter().enumerate() {
                let diff =
                    (mbr_a.enlargement(&entry.mbr) - mbr_b.enlargement(&entry.mbr)).abs();
                if diff > best_diff {
                    best_diff = diff;
                    best = index;
                }
            }
            Some(best)
        }
    }
}

/// Guttman's linear seeds: the pair with the greatest normalized
/// separation along any axis.
fn linear_pick_seeds(entries: &[Entry], dimension: usize) -> (usize, usize) {
    let mut best_separation = f64::NEG_INFINITY;
    let mut seeds = (0, 1);

    for dim in 0..dimension {
        let mut lowest_low = 0;
        let mut highest_high = 0;
        let mut highest_low = 0;
        let mut lowest_high = 0;

        for (index, entry) in entries.iter().enumerate() {
            if entry.mbr.low[dim] < entries[lowest_low].mbr.low[dim] {
                lowest_low = index;
            }
            if entry.mbr.high[dim] > entries[highest_high].mbr.high[dim] {
                highest_high = index;
            }
            if entry.mbr.low[dim] > entries[highest_low].mbr.low[dim] {
                highest_low = index;
            }
            if entry.mbr.high[dim] < entries[lowest_high].mbr.high[dim] {
                lowest_high = index;
            }
        }

        let width = entries[highest_high].mbr.high[dim] - entries[lowest_low].mbr.low[dim];
        if width <= 0.0 {
            continue;
        }
        let separation =
            (entries[highest_low].mbr.low[dim] - entries[lowest_high].mbr.high[dim]) / width;

        if separation > best_separation && highest_low != lowest_high {
            best_separation = separation;
            seeds = (highest_low, lowest_high);
        }
    }

    order_seeds(seeds, entries.len())
}

/// Guttman's quadratic seeds: the pair wasting the most area when paired.
fn quadratic_pick_seeds(entries: &[Entry]) -> (usize, usize) {
    let mut worst = f64::NEG_INFINITY;
    let mut seeds = (0, 1);

    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let waste = entries[i].mbr.combined_area(&entries[j].mbr)
                - entries[i].mbr.area()
                - entries[j].mbr.area();
            if waste > worst {
                worst = waste;
                seeds = (i, j);
            }
        }
    }

    seeds
}

fn order_seeds(seeds: (usize, usize), len: usize) -> (usize, usize) {
    let (a, b) = seeds;
    if a == b {
        // Degenerate data (all entries identical); fall back to the first
        // two entries.
        if len > 1 {
            (0, 1)
        } else {
            (0, 0)
        }
    } else {
        (a, b)
    }
}

/// R* split: choose the axis minimizing total margin over all candidate
/// distributions, then the distribution minimizing overlap, ties by area.
fn rstar_split(
    entries: Vec<Entry>,
    split_distribution_factor: f64,
    dimension: usize,
) -> (Vec<Entry>, Vec<Entry>) {
    let total = entries.len();
    let minimum_load = ((total as f64 * split_distribution_factor).floor() as usize).max(1);
    let minimum_load = minimum_load.min(total / 2);

    let mut best_axis = 0;
    let mut best_margin = f64::INFINITY;

    for dim in 0..dimension {
        let mut margin = 0.0;
        for sorted in axis_sorts(&entries, dim) {
            for l in minimum_load..=(total - minimum_load) {
                margin += bounding_region(&sorted[..l], dimension).margin()
                    + bounding_region(&sorted[l..], dimension).margin();
            }
        }
        if margin < best_margin {
            best_margin = margin;
            best_axis = dim;
        }
    }

    let mut best_overlap = f64::INFINITY;
    let mut best_area = f64::INFINITY;
    let mut best: Option<(Vec<Entry>, Vec<Entry>)> = None;

    for sorted in axis_sorts(&entries, best_axis) {
        for l in minimum_load..=(total - minimum_load) {
            let mbr_a = bounding_region(&sorted[..l], dimension);
            let mbr_b = bounding_region(&sorted[l..], dimension);
            let overlap = mbr_a.intersecting_area(&mbr_b);
            let area = mbr_a.area() + mbr_b.area();

            if overlap < best_overlap || (overlap == best_overlap && area < best_area) {
                best_overlap = overlap;
                best_area = area;
                best = Some((sorted[..l].to_vec(), sorted[l..].to_vec()));
            }
        }
    }

    best.unwrap_or_else(|| {
        // Unreachable with minimum_load >= 1; fall back to a midpoint cut.
        let sorted = axis_sorts(&entries, best_axis);
        let mid = total / 2;
        (sorted[0][..mid].to_vec(), sorted[0][mid..].to_vec())
    })
}

/// The two R* sort orders for an axis: by low value, then by high value.
fn axis_sorts(entries: &[Entry], dim: usize) -> [Vec<Entry>; 2] {
    let mut by_low = entries.to_vec();
    by_low.sort_by(|a, b| {
        a.mbr.low[dim]
            .total_cmp(&b.mbr.low[dim])
            .then_with(|| a.mbr.high[dim].total_cmp(&b.mbr.high[dim]))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut by_high = entries.to_vec();
    by_high.sort_by(|a, b| {
        a.mbr.high[dim]
            .total_cmp(&b.mbr.high[dim])
            .then_with(|| a.mbr.low[dim].total_cmp(&b.mbr.low[dim]))
            .then_with(|| a.id.cmp(&b.id))
    });

    [by_low, by_high]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_entry(x: f64, y: f64, id: u64) -> Entry {
        Entry::new(Region::new(vec![x, y], vec![x, y]), id)
    }

    fn two_clusters() -> Vec<Entry> {
        vec![
            point_entry(0.0, 0.0, 1),
            point_entry(1.0, 1.0, 2),
            point_entry(0.5, 0.5, 3),
            point_entry(10.0, 10.0, 4),
            point_entry(11.0, 11.0, 5),
        ]
    }

    fn assert_partition(groups: &(Vec<Entry>, Vec<Entry>), expected_total: usize) {
        assert!(!groups.0.is_empty());
        assert!(!groups.1.is_empty());
        assert_eq!(groups.0.len() + groups.1.len(), expected_total);

        let mut ids: Vec<u64> = groups.0.iter().chain(&groups.1).map(|e| e.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), expected_total);
    }

    #[test]
    fn test_quadratic_split_separates_clusters() {
        let groups = split_entries(TreeVariant::Quadratic, two_clusters(), 2, 0.4, 2);
        assert_partition(&groups, 5);

        let (near, far) = if groups.0.iter().any(|e| e.id == 1) {
            (&groups.0, &groups.1)
        } else {
            (&groups.1, &groups.0)
        };
        assert!(near.iter().all(|e| e.id <= 3));
        assert!(far.iter().all(|e| e.id >= 4));
    }

    #[test]
    fn test_linear_split_partitions() {
        let groups = split_entries(TreeVariant::Linear, two_clusters(), 2, 0.4, 2);
        assert_partition(&groups, 5);
    }

    #[test]
    fn test_rstar_split_respects_minimum_load() {
        let entries: Vec<Entry> = (0..10).map(|i| point_entry(i as f64, 0.0, i as u64)).collect();
        let groups = split_entries(TreeVariant::Rstar, entries, 4, 0.4, 2);
        assert_partition(&groups, 10);
        assert!(groups.0.len() >= 4);
        assert!(groups.1.len() >= 4);
    }

    #[test]
    fn test_rstar_split_separates_clusters() {
        let groups = split_entries(TreeVariant::Rstar, two_clusters(), 2, 0.4, 2);
        assert_partition(&groups, 5);

        let (near, far) = if groups.0.iter().any(|e| e.id == 1) {
            (&groups.0, &groups.1)
        } else {
            (&groups.1, &groups.0)
        };
        assert!(near.iter().all(|e| e.id <= 3));
        assert!(far.iter().all(|e| e.id >= 4));
    }

    #[test]
    fn test_split_of_identical_entries() {
        let entries: Vec<Entry> = (0..5).map(|i| point_entry(1.0, 1.0, i as u64)).collect();
        for variant in [TreeVariant::Linear, TreeVariant::Quadratic, TreeVariant::Rstar] {
            let groups = split_entries(variant, entries.clone(), 2, 0.4, 2);
            assert_partition(&groups, 5);
        }
    }

    #[test]
    fn test_take_farthest() {
        let mut entries = two_clusters();
        let center = Point::xy(0.5, 0.5);
        let removed = take_farthest(&mut entries, &center, 2);

        let removed_ids: Vec<u64> = removed.iter().map(|e| e.id).collect();
        assert_eq!(removed_ids, vec![4, 5]);
        assert_eq!(entries.len(), 3);
    }
}
