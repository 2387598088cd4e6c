//! Shared fixtures for integration tests: a throwaway git repository seeded with a
//! `.linear_project.json`, suitable for driving the coordinator end-to-end.

use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;
use tiercoord::issue::{Issue, ProjectState};

pub struct ProjectFixture {
    _dir: TempDir,
    pub root: PathBuf,
}

impl ProjectFixture {
    pub fn new(issues: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path().to_path_buf();

        let run = |args: &[&str]| {
            let status = Command::new("git")
                .current_dir(&root)
                .args(args)
                .env("GIT_AUTHOR_NAME", "tiercoord-tests")
                .env("GIT_AUTHOR_EMAIL", "tests@example.com")
                .env("GIT_COMMITTER_NAME", "tiercoord-tests")
                .env("GIT_COMMITTER_EMAIL", "tests@example.com")
                .status()
                .expect("run git");
            assert!(status.success(), "git {args:?} failed");
        };

        run(&["init", "-b", "main"]);
        std::fs::write(root.join("README.md"), "seed\n").expect("write README");
        run(&["add", "."]);
        run(&["commit", "-m", "initial"]);

        let state = ProjectState {
            issues: issues
                .iter()
                .map(|(id, category)| Issue {
                    id: id.to_string(),
                    title: String::new(),
                    category: category.to_string(),
                    priority: "Medium".to_string(),
                    extra: Default::default(),
                })
                .collect(),
        };
        std::fs::write(
            root.join(ProjectState::FILENAME),
            serde_json::to_string(&state).expect("serialize project state"),
        )
        .expect("write project state");

        Self { _dir: dir, root }
    }

    pub fn git(&self, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .env("GIT_AUTHOR_NAME", "tiercoord-tests")
            .env("GIT_AUTHOR_EMAIL", "tests@example.com")
            .env("GIT_COMMITTER_NAME", "tiercoord-tests")
            .env("GIT_COMMITTER_EMAIL", "tests@example.com")
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }
}
