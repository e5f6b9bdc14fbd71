//! Configuration types.

use std::time::Duration;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Topic that job-start envelopes are published to.
    pub job_topic: String,
    /// Consumer group name shared by all job workers.
    pub consumer_group: String,
    /// Number of worker instances pulling from the job topic.
    pub worker_count: usize,
    /// Maximum agent-loop iterations per job.
    pub max_iterations: u32,
    /// Per-tool-call execution timeout.
    pub call_timeout: Duration,
    /// Unacknowledged deliveries are redelivered after this long.
    pub visibility_timeout: Duration,
    /// Delivery attempts before a message is dead-lettered.
    pub max_delivery_attempts: u32,
    /// Fixed delay before a nacked message is redelivered.
    pub redelivery_backoff: Duration,
    /// Admissions allowed per identity per window.
    pub rate_limit: u64,
    /// Rate limit window size.
    pub rate_window: Duration,
    /// Jobs running longer than this are failed by the reaper.
    pub stuck_threshold: Duration,
    /// Reaper sweep interval.
    pub reaper_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            job_topic: "jobs".to_string(),
            consumer_group: "job-workers".to_string(),
            worker_count: 4,
            max_iterations: 20,
            call_timeout: Duration::from_secs(60),
            visibility_timeout: Duration::from_secs(30),
            max_delivery_attempts: 3,
            redelivery_backoff: Duration::from_millis(500),
            rate_limit: 20,
            rate_window: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(300), // 5 minutes
            reaper_interval: Duration::from_secs(60),
        }
    }
}
