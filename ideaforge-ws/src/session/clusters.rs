//! Cluster builder: semantic grouping with a deterministic fallback
//!
//! The primary grouping source is an external collaborator whose output
//! is untrusted: membership must form an exact partition of the idea
//! set, the cluster count must land in the allowed range, and names must
//! be unique. Anything else is rejected, and rejection routes to the
//! deterministic fallback rather than to the caller.

use ideaforge_common::model::{Cluster, Idea, LevelLabel};
use ideaforge_common::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};

/// Fewest clusters the primary source may produce (when enough ideas exist)
const MIN_CLUSTERS: usize = 4;

/// Most clusters either source may produce
const MAX_CLUSTERS: usize = 7;

/// Target ideas per cluster for the deterministic fallback
const FALLBACK_CHUNK: usize = 5;

/// Untrusted cluster description as returned by the semantic grouping
/// source. Stable ids `c1..ck` are assigned after validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterDraft {
    pub name: String,
    pub description: String,
    pub member_idea_ids: Vec<String>,
    pub business_impact: LevelLabel,
    pub implementation_effort: LevelLabel,
    pub maturity_appropriateness: LevelLabel,
    pub impact_rationale: String,
    pub maturity_rationale: String,
}

/// Validate drafts against the session's idea set and mint [`Cluster`]s.
///
/// Every idea must appear in exactly one draft, the draft count must be
/// 4..=7 (bounded below by the idea count when fewer than 4 ideas
/// exist), and names must be unique case-insensitively.
pub fn validate_drafts(drafts: Vec<ClusterDraft>, ideas: &[Idea]) -> Result<Vec<Cluster>> {
    let min = MIN_CLUSTERS.min(ideas.len());
    if drafts.len() < min || drafts.len() > MAX_CLUSTERS {
        return Err(Error::Invalid(format!(
            "grouping source returned {} clusters (expected {}..={})",
            drafts.len(),
            min,
            MAX_CLUSTERS
        )));
    }

    let known: BTreeSet<&str> = ideas.iter().map(|i| i.id.as_str()).collect();
    let mut seen_ideas: HashSet<&str> = HashSet::with_capacity(ideas.len());
    let mut seen_names: HashSet<String> = HashSet::with_capacity(drafts.len());

    for draft in &drafts {
        if draft.name.trim().is_empty() {
            return Err(Error::Invalid("cluster name must not be empty".into()));
        }
        if !seen_names.insert(draft.name.trim().to_lowercase()) {
            return Err(Error::Invalid(format!("duplicate cluster name {:?}", draft.name)));
        }
        if draft.member_idea_ids.is_empty() {
            return Err(Error::Invalid(format!("cluster {:?} has no members", draft.name)));
        }
        for idea_id in &draft.member_idea_ids {
            if !known.contains(idea_id.as_str()) {
                return Err(Error::Invalid(format!("unknown idea id {}", idea_id)));
            }
            if !seen_ideas.insert(idea_id.as_str()) {
                return Err(Error::Invalid(format!(
                    "idea {} assigned to more than one cluster",
                    idea_id
                )));
            }
        }
    }

    if seen_ideas.len() != ideas.len() {
        return Err(Error::Invalid(format!(
            "grouping covers {} of {} ideas; membership must be a partition",
            seen_ideas.len(),
            ideas.len()
        )));
    }

    Ok(drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| Cluster {
            id: format!("c{}", index + 1),
            name: draft.name,
            description: draft.description,
            member_idea_ids: draft.member_idea_ids,
            business_impact: draft.business_impact,
            implementation_effort: draft.implementation_effort,
            maturity_appropriateness: draft.maturity_appropriateness,
            impact_rationale: draft.impact_rationale,
            maturity_rationale: draft.maturity_rationale,
            fallback: false,
        })
        .collect())
}

/// Deterministic substitute grouping: ⌈n/5⌉ clusters (capped at 7) of
/// near-equal size in original submission order, all labels medium.
/// Never fails for a non-empty idea set.
pub fn fallback_clusters(ideas: &[Idea]) -> Vec<Cluster> {
    let n = ideas.len();
    debug_assert!(n > 0);
    let count = n.div_ceil(FALLBACK_CHUNK).clamp(1, MAX_CLUSTERS);

    let base = n / count;
    let remainder = n % count;

    let mut clusters = Vec::with_capacity(count);
    let mut cursor = 0usize;
    for index in 0..count {
        let size = base + usize::from(index < remainder);
        let members: Vec<String> = ideas[cursor..cursor + size]
            .iter()
            .map(|i| i.id.clone())
            .collect();
        cursor += size;

        clusters.push(Cluster {
            id: format!("c{}", index + 1),
            name: format!("Idea group {}", index + 1),
            description: format!(
                "Auto-grouped set of {} ideas in submission order",
                size
            ),
            member_idea_ids: members,
            business_impact: LevelLabel::Medium,
            implementation_effort: LevelLabel::Medium,
            maturity_appropriateness: LevelLabel::Medium,
            impact_rationale: "Auto-grouped: no semantic impact estimate available".into(),
            maturity_rationale: "Auto-grouped: no semantic maturity estimate available".into(),
            fallback: true,
        });
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use ideaforge_common::model::idea_id;
    use uuid::Uuid;

    fn ideas(n: usize) -> Vec<Idea> {
        let author = Uuid::new_v4();
        (0..n)
            .map(|i| {
                let sheet = i / 18;
                let round = (i / 3) % 6 + 1;
                let position = i % 3 + 1;
                Idea {
                    id: idea_id(sheet, round as u8, position as u8),
                    sheet_index: sheet,
                    round: round as u8,
                    position: position as u8,
                    author,
                    text: format!("idea {}", i),
                }
            })
            .collect()
    }

    fn draft(name: &str, members: Vec<String>) -> ClusterDraft {
        ClusterDraft {
            name: name.to_string(),
            description: format!("{} description", name),
            member_idea_ids: members,
            business_impact: LevelLabel::High,
            implementation_effort: LevelLabel::Low,
            maturity_appropriateness: LevelLabel::Medium,
            impact_rationale: "strong revenue angle".into(),
            maturity_rationale: "fits current tooling".into(),
        }
    }

    fn partition_drafts(ideas: &[Idea], k: usize) -> Vec<ClusterDraft> {
        let mut drafts: Vec<ClusterDraft> = (0..k)
            .map(|i| draft(&format!("group {}", i), Vec::new()))
            .collect();
        for (i, idea) in ideas.iter().enumerate() {
            drafts[i % k].member_idea_ids.push(idea.id.clone());
        }
        drafts
    }

    #[test]
    fn test_valid_partition_gets_stable_ids() {
        let ideas = ideas(20);
        let clusters = validate_drafts(partition_drafts(&ideas, 5), &ideas).unwrap();
        assert_eq!(clusters.len(), 5);
        assert_eq!(clusters[0].id, "c1");
        assert_eq!(clusters[4].id, "c5");
        assert!(clusters.iter().all(|c| !c.fallback));
    }

    #[test]
    fn test_missing_idea_rejected() {
        let ideas = ideas(20);
        let mut drafts = partition_drafts(&ideas, 5);
        drafts[0].member_idea_ids.pop();
        assert!(validate_drafts(drafts, &ideas).is_err());
    }

    #[test]
    fn test_double_assignment_rejected() {
        let ideas = ideas(20);
        let mut drafts = partition_drafts(&ideas, 5);
        let dup = drafts[0].member_idea_ids[0].clone();
        drafts[1].member_idea_ids.push(dup);
        assert!(validate_drafts(drafts, &ideas).is_err());
    }

    #[test]
    fn test_unknown_idea_rejected() {
        let ideas = ideas(20);
        let mut drafts = partition_drafts(&ideas, 5);
        drafts[0].member_idea_ids.push("s9r9n9".into());
        assert!(validate_drafts(drafts, &ideas).is_err());
    }

    #[test]
    fn test_count_out_of_range_rejected() {
        let ideas = ideas(20);
        assert!(validate_drafts(partition_drafts(&ideas, 3), &ideas).is_err());
        assert!(validate_drafts(partition_drafts(&ideas, 8), &ideas).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let ideas = ideas(20);
        let mut drafts = partition_drafts(&ideas, 4);
        drafts[1].name = "Group 0".into(); // case-insensitive clash with "group 0"
        assert!(validate_drafts(drafts, &ideas).is_err());
    }

    #[test]
    fn test_tiny_idea_set_allows_fewer_clusters() {
        let ideas = ideas(3);
        let drafts: Vec<ClusterDraft> = ideas
            .iter()
            .enumerate()
            .map(|(i, idea)| draft(&format!("single {}", i), vec![idea.id.clone()]))
            .collect();
        let clusters = validate_drafts(drafts, &ideas).unwrap();
        assert_eq!(clusters.len(), 3);
    }

    #[test]
    fn test_fallback_fourteen_ideas_splits_5_5_4() {
        let ideas = ideas(14);
        let clusters = fallback_clusters(&ideas);
        assert_eq!(clusters.len(), 3);
        let sizes: Vec<usize> = clusters.iter().map(|c| c.member_idea_ids.len()).collect();
        assert_eq!(sizes, vec![5, 5, 4]);
        assert!(clusters.iter().all(|c| c.fallback));
        assert!(clusters.iter().all(|c| c.business_impact == LevelLabel::Medium));
        assert!(clusters.iter().all(|c| c.impact_rationale.starts_with("Auto-grouped")));
    }

    #[test]
    fn test_fallback_preserves_submission_order_partition() {
        let ideas = ideas(14);
        let clusters = fallback_clusters(&ideas);
        let flattened: Vec<String> = clusters
            .iter()
            .flat_map(|c| c.member_idea_ids.clone())
            .collect();
        let original: Vec<String> = ideas.iter().map(|i| i.id.clone()).collect();
        assert_eq!(flattened, original);
    }

    #[test]
    fn test_fallback_caps_at_seven_clusters() {
        let ideas = ideas(54);
        let clusters = fallback_clusters(&ideas);
        assert_eq!(clusters.len(), 7);
        let total: usize = clusters.iter().map(|c| c.member_idea_ids.len()).sum();
        assert_eq!(total, 54);
    }
}
