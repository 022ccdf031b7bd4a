//! Two-phase vote tallier
//!
//! Each participant allocates exactly 3 points per phase across one or
//! more targets (clusters in Phase 1, ideas of the selected cluster in
//! Phase 2). Re-votes are rejected; the first accepted allocation is
//! final.

use ideaforge_common::model::{RankEntry, Ranking, VoteAllocation, VOTE_POINTS};
use ideaforge_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Validate an allocation against the phase's target scope.
///
/// Rules: at least one target, every value ≥ 1, values sum to exactly 3,
/// every target id exists in scope.
pub fn validate_allocation(
    allocation: &BTreeMap<String, u32>,
    scope: &BTreeSet<String>,
) -> Result<()> {
    if allocation.is_empty() {
        return Err(Error::Invalid("allocation must name at least one target".into()));
    }

    let mut sum: u64 = 0;
    for (target, points) in allocation {
        if *points < 1 {
            return Err(Error::Invalid(format!(
                "allocation for {} must be at least 1 point",
                target
            )));
        }
        if !scope.contains(target) {
            return Err(Error::Missing(format!("unknown vote target {}", target)));
        }
        sum += *points as u64;
    }

    if sum != VOTE_POINTS as u64 {
        return Err(Error::Invalid(format!(
            "allocation points must sum to exactly {} (got {})",
            VOTE_POINTS, sum
        )));
    }

    Ok(())
}

/// Tally allocations into a ranking over the full target scope.
///
/// Targets nobody voted for appear with zero points. Order: total points
/// descending, then target id ascending (the documented stable
/// tie-break). Ties share a rank; `top` holds every target tied for
/// rank 1.
pub fn tally(
    allocations: &BTreeMap<Uuid, VoteAllocation>,
    scope: &BTreeSet<String>,
) -> Ranking {
    let mut totals: BTreeMap<&str, u32> =
        scope.iter().map(|t| (t.as_str(), 0)).collect();

    for alloc in allocations.values() {
        for (target, points) in &alloc.points {
            if let Some(total) = totals.get_mut(target.as_str()) {
                *total += points;
            }
        }
    }

    let mut ordered: Vec<(&str, u32)> = totals.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut entries = Vec::with_capacity(ordered.len());
    let mut rank = 0u32;
    let mut last_points: Option<u32> = None;
    for (position, (target, points)) in ordered.iter().enumerate() {
        if last_points != Some(*points) {
            rank = position as u32 + 1;
            last_points = Some(*points);
        }
        entries.push(RankEntry {
            target_id: target.to_string(),
            total_points: *points,
            rank,
        });
    }

    let top = entries
        .iter()
        .filter(|e| e.rank == 1)
        .map(|e| e.target_id.clone())
        .collect();

    Ranking {
        entries,
        top,
        ballots: allocations.len(),
    }
}
