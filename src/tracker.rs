//! Remote tracker status client, grounded on `linear_status.py`'s fail-open,
//! one-call-per-identifier design.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// The tracker's state-type classification for one issue. Closed per the sum-type
/// discipline design note rather than the original's bare strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StateType {
    Completed,
    #[serde(rename = "canceled")]
    #[strum(serialize = "canceled")]
    Canceled,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueStatus {
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "unknown_state_name")]
    pub state_name: String,
    pub state_type: StateType,
    #[serde(default)]
    pub completed_at: Option<String>,
}

fn unknown_state_name() -> String {
    "Unknown".to_string()
}

/// Queries a single issue's status. Implemented by [`HttpTracker`] for production use
/// and trivially fakeable in tests.
pub trait TrackerBackend {
    fn fetch(&self, identifier: &str) -> anyhow::Result<IssueStatus>;
}

/// Backing HTTP client for the remote tracker. Credential is read once at
/// construction; its absence is the one tracker-related failure that aborts the run
/// rather than being classified `unknown`.
pub struct HttpTracker {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl HttpTracker {
    pub const TOKEN_ENV: &'static str = "TIERCOORD_TRACKER_TOKEN";
    pub const BASE_URL_ENV: &'static str = "TIERCOORD_TRACKER_URL";

    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var(Self::TOKEN_ENV).map_err(|_| {
            anyhow::anyhow!("{} not set; cannot check tracker issue statuses", Self::TOKEN_ENV)
        })?;
        let base_url = std::env::var(Self::BASE_URL_ENV)
            .unwrap_or_else(|_| "https://api.linear.app/tiercoord".to_string());
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }
}

impl TrackerBackend for HttpTracker {
    fn fetch(&self, identifier: &str) -> anyhow::Result<IssueStatus> {
        let url = format!("{}/issues/{identifier}", self.base_url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()?
            .error_for_status()?;
        let status: IssueStatus = response.json()?;
        Ok(status)
    }
}

/// Checks the status of many identifiers, one call at a time, never failing the whole
/// run on a single identifier's error.
pub struct Tracker<B: TrackerBackend> {
    backend: B,
}

impl<B: TrackerBackend> Tracker<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the completed set, the cancelled set, and the full per-identifier
    /// status map. A failed individual lookup is recorded as `Unknown` rather than
    /// propagated. Progress is logged every ten identifiers.
    pub fn check_statuses(
        &self,
        identifiers: &[String],
    ) -> (BTreeSet<String>, BTreeSet<String>, IndexMap<String, IssueStatus>) {
        let mut completed = BTreeSet::new();
        let mut cancelled = BTreeSet::new();
        let mut status_map = IndexMap::new();

        log::info!("checking status of {} issues", identifiers.len());

        for (i, identifier) in identifiers.iter().enumerate() {
            let status = self.backend.fetch(identifier).unwrap_or_else(|e| {
                log::warn!("could not fetch status for {identifier}: {e}");
                IssueStatus {
                    identifier: identifier.clone(),
                    title: String::new(),
                    state_name: unknown_state_name(),
                    state_type: StateType::Unknown,
                    completed_at: None,
                }
            });

            match status.state_type {
                StateType::Completed => {
                    completed.insert(identifier.clone());
                }
                StateType::Canceled => {
                    cancelled.insert(identifier.clone());
                }
                StateType::Unknown => {}
            }
            status_map.insert(identifier.clone(), status);

            if (i + 1) % 10 == 0 {
                log::info!("... checked {}/{}", i + 1, identifiers.len());
            }
        }

        log::info!(
            "status check complete: {} done, {} cancelled, {} remaining",
            completed.len(),
            cancelled.len(),
            identifiers.len() - completed.len() - cancelled.len()
        );

        (completed, cancelled, status_map)
    }
}
