//! `.codebase_learnings.json` model, grounded on `learnings.py`. Read by the worker
//! supervisor to enrich prompts; never written by this crate (the worker processes
//! own any updates to it).

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Free-text impressions of the codebase's shape. Empty strings are treated as
/// "nothing recorded yet" rather than omitted fields, matching the original's
/// always-present default structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodebasePatterns {
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub styling: String,
    #[serde(default)]
    pub state_management: String,
    #[serde(default)]
    pub file_structure: String,
}

impl CodebasePatterns {
    fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("framework", &self.framework),
            ("styling", &self.styling),
            ("state_management", &self.state_management),
            ("file_structure", &self.file_structure),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mistake {
    #[serde(default = "unknown_issue")]
    pub issue: String,
    #[serde(default = "no_fix_recorded")]
    pub fix: String,
}

fn unknown_issue() -> String {
    "Unknown issue".to_string()
}

fn no_fix_recorded() -> String {
    "No fix recorded".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectivePattern {
    #[serde(default = "unknown_pattern")]
    pub pattern: String,
    #[serde(default = "unknown_confidence")]
    pub confidence: String,
}

fn unknown_pattern() -> String {
    "Unknown pattern".to_string()
}

fn unknown_confidence() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewFinding {
    #[serde(rename = "type", default = "general_finding_type")]
    pub finding_type: String,
    #[serde(default = "unknown_finding")]
    pub finding: String,
}

fn general_finding_type() -> String {
    "general".to_string()
}

fn unknown_finding() -> String {
    "Unknown finding".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodebaseLearnings {
    #[serde(default)]
    pub codebase_patterns: CodebasePatterns,
    #[serde(default)]
    pub common_mistakes: Vec<Mistake>,
    #[serde(default)]
    pub effective_patterns: Vec<EffectivePattern>,
    #[serde(default)]
    pub review_findings: Vec<ReviewFinding>,
}

impl CodebaseLearnings {
    pub const FILENAME: &'static str = ".codebase_learnings.json";

    /// Missing or malformed files are treated as an empty structure rather than an
    /// error: this file is advisory context for prompts, not required state.
    pub fn load(project_dir: &Path) -> Self {
        let path = project_dir.join(Self::FILENAME);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(_) => return Self::default(),
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            log::warn!("ignoring malformed {}: {e}", path.display());
            Self::default()
        })
    }

    /// Renders the last few entries of each list as a markdown block suitable for
    /// splicing into a worker prompt, headed exactly as the original agent prompt
    /// expects: `## CODEBASE CONTEXT (from past sessions)`.
    pub fn format_for_prompt(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        let pattern_lines: Vec<String> = self
            .codebase_patterns
            .entries()
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("- **{key}**: {value}"))
            .collect();
        if !pattern_lines.is_empty() {
            sections.push(format!("### Codebase Patterns\n{}", pattern_lines.join("\n")));
        }

        if !self.common_mistakes.is_empty() {
            let lines: Vec<String> = last_n(&self.common_mistakes, 5)
                .iter()
                .map(|m| format!("- {} → {}", m.issue, m.fix))
                .collect();
            sections.push(format!("### Common Mistakes to Avoid\n{}", lines.join("\n")));
        }

        if !self.effective_patterns.is_empty() {
            let lines: Vec<String> = last_n(&self.effective_patterns, 5)
                .iter()
                .map(|p| format!("- {} (confidence: {})", p.pattern, p.confidence))
                .collect();
            sections.push(format!("### Effective Patterns\n{}", lines.join("\n")));
        }

        if !self.review_findings.is_empty() {
            let lines: Vec<String> = last_n(&self.review_findings, 3)
                .iter()
                .map(|f| format!("- [{}] {}", f.finding_type, f.finding))
                .collect();
            sections.push(format!("### Recent Review Findings\n{}", lines.join("\n")));
        }

        if sections.is_empty() {
            return String::new();
        }

        format!(
            "## CODEBASE CONTEXT (from past sessions)\n\n{}",
            sections.join("\n\n")
        )
    }
}

fn last_n<T>(items: &[T], n: usize) -> &[T] {
    let start = items.len().saturating_sub(n);
    &items[start..]
}
