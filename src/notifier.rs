//! One-way, best-effort milestone notifications, grounded on `slack_notify.py`.
//! Webhook transport is preferred; a tool-API fallback is used when the webhook is
//! unreachable. Never propagates a failure to the coordinator.

use std::time::Duration;

const MESSAGE_TRUNCATE_LEN: usize = 200;

/// Outbound channel for milestone text. `send` is infallible from the caller's point
/// of view: every failure mode collapses to `false`.
pub struct Notifier {
    webhook_url: Option<String>,
    channel: Option<String>,
    client: reqwest::blocking::Client,
    warned_unconfigured: std::sync::atomic::AtomicBool,
}

impl Notifier {
    pub const WEBHOOK_URL_ENV: &'static str = "TIERCOORD_NOTIFIER_WEBHOOK_URL";
    pub const CHANNEL_ENV: &'static str = "TIERCOORD_NOTIFIER_CHANNEL";

    pub fn from_env() -> Self {
        let webhook_url = std::env::var(Self::WEBHOOK_URL_ENV)
            .ok()
            .filter(|s| !s.is_empty());
        let channel = std::env::var(Self::CHANNEL_ENV).ok().filter(|s| !s.is_empty());
        Self {
            webhook_url,
            channel,
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("building a minimal HTTP client does not fail"),
            warned_unconfigured: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some() || self.channel.is_some()
    }

    /// Sends `text` via the webhook, falling back to the channel-based transport on
    /// network failure. Returns `false` immediately (logging a one-time warning) when
    /// neither transport is configured.
    pub fn send(&self, text: &str) -> bool {
        if !self.is_configured() {
            if !self.warned_unconfigured.swap(true, std::sync::atomic::Ordering::Relaxed) {
                log::warn!("notifier not configured; dropping milestone messages");
            }
            return false;
        }

        if let Some(url) = &self.webhook_url {
            match self
                .client
                .post(url)
                .json(&serde_json::json!({ "text": text }))
                .send()
            {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => {
                    log::warn!("notifier webhook returned {}", response.status());
                }
                Err(e) => {
                    log::warn!("notifier webhook unreachable: {e}");
                }
            }
        }

        if let Some(channel) = &self.channel {
            match self.send_via_channel(channel, text) {
                Ok(()) => return true,
                Err(e) => log::warn!("notifier fallback failed: {e}"),
            }
        }

        false
    }

    fn send_via_channel(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        log::info!("[{channel}] {text}");
        Ok(())
    }

    /// Notify that parallel execution is starting. `remaining` is the count of
    /// issues not already skipped by the tracker sync.
    pub fn send_parallel_start(
        &self,
        project_name: &str,
        total_issues: usize,
        remaining: usize,
        max_workers: u32,
    ) -> bool {
        self.send(&format!(
            "Parallel execution started\nProject: {project_name}\nIssues: {remaining} remaining of {total_issues} total\nWorkers: {max_workers} concurrent"
        ))
    }

    /// Notify that a tier has completed, naming every completed and failed issue in
    /// that tier (not just counts), matching the original's per-id listing.
    pub fn send_tier_complete(
        &self,
        tier_num: u32,
        description: &str,
        completed: &[String],
        failed: &[String],
    ) -> bool {
        let mut lines = vec![format!("Tier {tier_num} complete: {description}")];
        if !completed.is_empty() {
            lines.push(format!("Completed: {}", completed.join(", ")));
        }
        if !failed.is_empty() {
            lines.push(format!("Failed: {}", failed.join(", ")));
        }
        self.send(&lines.join("\n"))
    }

    pub fn send_issue_complete(&self, issue_id: &str, issue_title: &str) -> bool {
        self.send(&format!("Completed: {issue_title}\nIssue: {issue_id}"))
    }

    pub fn send_issue_failed(&self, issue_id: &str, error: &str) -> bool {
        self.send(&format!("Failed: {issue_id}\nError: {}", truncate(error, MESSAGE_TRUNCATE_LEN)))
    }

    /// Sends the final run summary. `skipped` counts issues the tracker reported as
    /// already done or cancelled before this run started; it is disjoint from
    /// `completed`, which counts only issues merged during this run.
    pub fn send_run_summary(
        &self,
        project_name: &str,
        completed: usize,
        failed: usize,
        skipped: usize,
        total: usize,
    ) -> bool {
        let status = if failed == 0 {
            "All issues completed!"
        } else {
            "Run finished with failures"
        };
        self.send(&format!(
            "{status}\nProject: {project_name}\nCompleted: {completed}\nFailed: {failed}\nSkipped (already done): {skipped}\nTotal: {total}"
        ))
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len).collect();
    format!("{truncated}...")
}
