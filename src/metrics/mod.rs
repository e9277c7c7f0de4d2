//! Pure calculations over a commit window.
//!
//! Nothing here touches the store or shared state: the same window and
//! reference time always produce the same result, so callers may compute
//! views for many repositories or people concurrently.

pub mod activity;
pub mod expertise;
pub mod ranking;

pub use activity::{summarize_activity, ActivityLevel, ActivitySnapshot, RECENT_DAYS};
pub use expertise::{
    expertise_score, proficiency, repository_contributions, technology_scores, ExpertiseSignals,
    RepositoryContribution, TechnologyMap, TechnologyScore,
};
pub use ranking::{top_contributors, top_hotspots, Hotspot, TopContributor};

/// `round(100 * part / total)` with halves rounded up; 0 when `total` is 0.
pub fn percentage(part: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let part = part.min(total) as u128;
    let total = total as u128;
    ((200 * part + total) / (2 * total)) as u8
}

/// Split 100 points across `counts` proportionally (largest remainder).
///
/// The result always sums to exactly 100 for a non-empty, non-zero input.
/// Entries with equal counts receive leftover points together, so they end
/// up with equal shares whenever the leftover allows it without letting a
/// smaller count overtake a larger one. Points that cannot be spread evenly
/// go to the largest remainders, earlier entry first.
pub fn apportion(counts: &[usize]) -> Vec<u8> {
    let total: u128 = counts.iter().map(|&c| c as u128).sum();
    if total == 0 {
        return vec![0; counts.len()];
    }
    let floor = |count: usize| 100 * count as u128 / total;
    let remainder = |count: usize| 100 * count as u128 % total;

    let mut shares: Vec<u128> = counts.iter().map(|&c| floor(c)).collect();
    let mut leftover = (100 - shares.iter().sum::<u128>()) as usize;

    let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
    for (idx, &count) in counts.iter().enumerate() {
        match groups.iter_mut().find(|(c, _)| *c == count) {
            Some((_, members)) => members.push(idx),
            None => groups.push((count, vec![idx])),
        }
    }
    groups.sort_by(|a, b| remainder(b.0).cmp(&remainder(a.0)).then_with(|| b.0.cmp(&a.0)));

    let mut awarded = vec![false; counts.len()];
    let mut skipped: Vec<usize> = Vec::new();
    for (count, members) in &groups {
        if leftover == 0 {
            break;
        }
        let overtakes = skipped.iter().any(|&larger| larger > *count && floor(larger) < floor(*count) + 1);
        if members.len() > leftover || overtakes {
            skipped.push(*count);
            continue;
        }
        for &idx in members {
            shares[idx] += 1;
            awarded[idx] = true;
        }
        leftover -= members.len();
    }

    let mut rest: Vec<usize> = (0..counts.len()).filter(|&idx| !awarded[idx]).collect();
    rest.sort_by(|&a, &b| remainder(counts[b]).cmp(&remainder(counts[a])).then_with(|| a.cmp(&b)));
    for idx in rest.into_iter().take(leftover) {
        shares[idx] += 1;
    }

    shares.into_iter().map(|s| s as u8).collect()
}
