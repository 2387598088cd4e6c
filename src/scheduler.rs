//! Tier assignment and plan persistence.
//!
//! Buckets issues into ordered tiers by a static category→tier table, and tracks
//! which tiers run sequentially (a wave of size 1) versus in parallel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::issue::Issue;

const DEFAULT_TIER: u32 = 4;

fn tier_for_category(category: &str) -> u32 {
    match category.to_ascii_lowercase().as_str() {
        "setup" => 1,
        "backend" => 2,
        "frontend" | "a2ui-catalog" => 3,
        "feature" => 4,
        "styling" => 5,
        "testing" => 6,
        "integration" => 7,
        _ => DEFAULT_TIER,
    }
}

fn tier_description(tier: u32) -> &'static str {
    match tier {
        1 => "setup",
        2 => "backend",
        3 => "frontend",
        4 => "feature",
        5 => "styling",
        6 => "testing",
        7 => "integration",
        _ => "other",
    }
}

fn is_sequential(tier: u32) -> bool {
    matches!(tier, 1 | 7)
}

/// An ordered partition of issues the coordinator runs as a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionTier {
    pub tier: u32,
    pub description: String,
    pub sequential: bool,
    pub issue_ids: Vec<String>,
}

/// A built, persistable execution plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParallelPlan {
    pub created_at: DateTime<Utc>,
    pub max_parallelism: u32,
    pub total_issues: usize,
    pub tiers: Vec<ExecutionTier>,
}

impl ParallelPlan {
    pub const FILENAME: &'static str = ".parallel_plan.json";

    pub fn save(&self, project_dir: &Path) -> anyhow::Result<()> {
        let path = project_dir.join(Self::FILENAME);
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, data)
            .map_err(|e| anyhow::anyhow!("writing {}: {e}", path.display()))?;
        Ok(())
    }

    pub fn load(project_dir: &Path) -> anyhow::Result<Option<Self>> {
        let path = project_dir.join(Self::FILENAME);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let plan: Self = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
        Ok(Some(plan))
    }
}

/// Bucket `issues` into ordered tiers. Input iteration order is preserved within a
/// tier, which is the tie-break the coordinator relies on for deterministic waves.
pub fn build_plan(issues: &[Issue], max_parallelism: u32) -> ParallelPlan {
    let mut by_tier: indexmap::IndexMap<u32, Vec<String>> = indexmap::IndexMap::new();

    for issue in issues {
        let tier = tier_for_category(&issue.category);
        by_tier.entry(tier).or_default().push(issue.id.clone());
    }

    let mut tier_numbers: Vec<u32> = by_tier.keys().copied().collect();
    tier_numbers.sort_unstable();

    let tiers = tier_numbers
        .into_iter()
        .map(|tier| ExecutionTier {
            tier,
            description: tier_description(tier).to_string(),
            sequential: is_sequential(tier),
            issue_ids: by_tier.swap_remove(&tier).unwrap_or_default(),
        })
        .collect();

    ParallelPlan {
        created_at: Utc::now(),
        max_parallelism,
        total_issues: issues.len(),
        tiers,
    }
}

/// Returns the first tier (in ascending index order) with at least one identifier not
/// in `completed`, along with that tier's unfinished identifiers. `None` when every
/// tier is fully completed.
pub fn get_ready<'a>(
    plan: &'a ParallelPlan,
    completed: &BTreeSet<String>,
) -> (Vec<&'a str>, Option<&'a ExecutionTier>) {
    for tier in &plan.tiers {
        let unfinished: Vec<&str> = tier
            .issue_ids
            .iter()
            .filter(|id| !completed.contains(*id))
            .map(String::as_str)
            .collect();
        if !unfinished.is_empty() {
            return (unfinished, Some(tier));
        }
    }
    (Vec::new(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::setup("setup", 1, true)]
    #[case::backend("backend", 2, false)]
    #[case::frontend("frontend", 3, false)]
    #[case::a2ui_catalog("a2ui-catalog", 3, false)]
    #[case::feature("feature", 4, false)]
    #[case::styling("styling", 5, false)]
    #[case::testing("testing", 6, false)]
    #[case::integration("integration", 7, true)]
    #[case::mixed_case_backend("Backend", 2, false)]
    #[case::shouting_setup("SETUP", 1, true)]
    #[case::unrecognized("some-future-category", 4, false)]
    fn category_maps_to_expected_tier_and_mode(
        #[case] category: &str,
        #[case] expected_tier: u32,
        #[case] expected_sequential: bool,
    ) {
        let plan = build_plan(&[issue("T-1", category)], 2);
        assert_eq!(plan.tiers.len(), 1);
        assert_eq!(plan.tiers[0].tier, expected_tier);
        assert_eq!(plan.tiers[0].sequential, expected_sequential);
    }

    fn issue(id: &str, category: &str) -> Issue {
        Issue {
            id: id.to_string(),
            title: String::new(),
            category: category.to_string(),
            priority: "Medium".to_string(),
            extra: Default::default(),
        }
    }

    fn s1_issues() -> Vec<Issue> {
        vec![
            issue("T-1", "setup"),
            issue("T-2", "setup"),
            issue("T-3", "backend"),
            issue("T-4", "frontend"),
            issue("T-5", "a2ui-catalog"),
            issue("T-6", "integration"),
        ]
    }

    #[test]
    fn s1_plain_tier_sequencing() {
        let plan = build_plan(&s1_issues(), 2);
        let tier_summaries: Vec<(u32, bool, Vec<String>)> = plan
            .tiers
            .iter()
            .map(|t| (t.tier, t.sequential, t.issue_ids.clone()))
            .collect();

        assert_eq!(
            tier_summaries,
            vec![
                (1, true, vec!["T-1".to_string(), "T-2".to_string()]),
                (2, false, vec!["T-3".to_string()]),
                (3, false, vec!["T-4".to_string(), "T-5".to_string()]),
                (7, true, vec!["T-6".to_string()]),
            ]
        );

        let empty = BTreeSet::new();
        let (ready, tier) = get_ready(&plan, &empty);
        assert_eq!(ready, vec!["T-1", "T-2"]);
        assert_eq!(tier.unwrap().tier, 1);

        let mut completed = BTreeSet::new();
        completed.insert("T-1".to_string());
        let (ready, tier) = get_ready(&plan, &completed);
        assert_eq!(ready, vec!["T-2"]);
        assert_eq!(tier.unwrap().tier, 1);

        completed.insert("T-2".to_string());
        let (ready, tier) = get_ready(&plan, &completed);
        assert_eq!(ready, vec!["T-3"]);
        assert_eq!(tier.unwrap().tier, 2);
    }

    #[test]
    fn tier_ordering_is_strictly_ascending_and_exhaustive() {
        let issues: Vec<Issue> = ["setup", "weird-category", "testing", "backend"]
            .iter()
            .enumerate()
            .map(|(i, cat)| issue(&format!("T-{i}"), cat))
            .collect();
        let plan = build_plan(&issues, 3);

        let indices: Vec<u32> = plan.tiers.iter().map(|t| t.tier).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
        assert!(indices.windows(2).all(|w| w[0] < w[1]));

        let all_ids: BTreeSet<String> = plan
            .tiers
            .iter()
            .flat_map(|t| t.issue_ids.iter().cloned())
            .collect();
        assert_eq!(all_ids.len(), issues.len());

        // The unrecognized category lands in tier 4.
        let weird_tier = plan
            .tiers
            .iter()
            .find(|t| t.issue_ids.contains(&"T-1".to_string()))
            .unwrap();
        assert_eq!(weird_tier.tier, 4);
    }

    #[test]
    fn readiness_is_monotonic() {
        let plan = build_plan(&s1_issues(), 2);
        let mut completed = BTreeSet::new();
        completed.insert("T-1".to_string());
        completed.insert("T-2".to_string());
        completed.insert("T-3".to_string());

        let (_, tier) = get_ready(&plan, &completed);
        let ready_tier = tier.unwrap();
        for earlier in plan.tiers.iter().filter(|t| t.tier < ready_tier.tier) {
            assert!(earlier.issue_ids.iter().all(|id| completed.contains(id)));
        }
    }

    #[test]
    fn get_ready_returns_none_when_fully_completed() {
        let plan = build_plan(&s1_issues(), 2);
        let completed: BTreeSet<String> = plan
            .tiers
            .iter()
            .flat_map(|t| t.issue_ids.iter().cloned())
            .collect();
        let (ready, tier) = get_ready(&plan, &completed);
        assert!(ready.is_empty());
        assert!(tier.is_none());
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = build_plan(&s1_issues(), 2);
        let dir = tempfile::tempdir().unwrap();
        plan.save(dir.path()).unwrap();
        let loaded = ParallelPlan::load(dir.path()).unwrap().unwrap();
        assert_eq!(plan, loaded);
    }

    #[test]
    fn load_plan_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ParallelPlan::load(dir.path()).unwrap().is_none());
    }
}
