//! One analysis end to end: target resolution, invocation and events.
//!
//! Events for a request arrive in order: `Progress` at 40, one `Progress`
//! per streamed fragment (41 up to 75), `Progress` at 80, then exactly one
//! of `Completed` or `Failed`.

use crate::config::InsightSettings;
use crate::error::BridgeError;
use crate::storage::AnalysisStorage;
use crate::types::{InsightEvent, InsightResponse, InvocationRequest, InvocationResult, STATUS_CACHED};
use crate::InsightBridge;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sink for analysis events. Send failures are ignored.
pub type EventSender = mpsc::UnboundedSender<InsightEvent>;

const INVOKING_PERCENT: u8 = 40;
const STREAMING_CEILING: u8 = 75;
const FINALIZING_PERCENT: u8 = 80;
const MAX_PROGRESS_CHARS: usize = 200;

/// One file to analyze.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    /// Correlates this job's events.
    pub request_id: String,
    /// The file on disk the analysis belongs to.
    pub source: PathBuf,
    /// Payload sent to the tool.
    pub request: InvocationRequest,
    /// Skip the persistent target; the output only lives for the run.
    pub ad_hoc: bool,
}

impl AnalysisJob {
    /// A job with a fresh request id.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, request: InvocationRequest) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            request,
            ad_hoc: false,
        }
    }

    /// Replaces the generated request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Marks the job as ad hoc.
    #[must_use]
    pub const fn ad_hoc(mut self, ad_hoc: bool) -> Self {
        self.ad_hoc = ad_hoc;
        self
    }
}

/// Runs analyses for one project.
#[derive(Debug, Clone)]
pub struct Analyzer {
    bridge: InsightBridge,
    storage: AnalysisStorage,
}

impl Analyzer {
    /// An analyzer whose outputs live under `project_root`.
    #[must_use]
    pub fn new(settings: InsightSettings, project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let storage = AnalysisStorage::new(&project_root, &settings);
        Self {
            bridge: InsightBridge::for_project(settings, project_root),
            storage,
        }
    }

    /// Layout of this project's analysis outputs.
    #[must_use]
    pub const fn storage(&self) -> &AnalysisStorage {
        &self.storage
    }

    /// Runs `job`, publishing its events to `events`.
    ///
    /// The returned outcome mirrors the final event.
    ///
    /// # Errors
    /// Whatever the invocation fails with; `InvalidConfig` when the source is
    /// itself an analysis output.
    pub async fn analyze(
        &self,
        job: &AnalysisJob,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<InvocationResult, BridgeError> {
        let publish = |event: InsightEvent| {
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        };

        let outcome = self.run(job, cancel, &publish).await;
        match &outcome {
            Ok(result) => publish(InsightEvent::Completed {
                request_id: job.request_id.clone(),
                source: job.source.clone(),
                response: result.response.clone(),
            }),
            Err(e) => {
                if e.is_cancelled() {
                    tracing::info!("Analysis {} cancelled", job.request_id);
                } else {
                    tracing::warn!("Failed to analyze {}: {e}", job.source.display());
                }
                publish(InsightEvent::Failed {
                    request_id: job.request_id.clone(),
                    message: failure_message(e),
                    code: e.code().to_string(),
                });
            }
        }
        outcome
    }

    async fn run(
        &self,
        job: &AnalysisJob,
        cancel: &CancellationToken,
        publish: &(impl Fn(InsightEvent) + Sync),
    ) -> Result<InvocationResult, BridgeError> {
        if self.storage.is_analysis_output(&job.source) {
            return Err(BridgeError::InvalidConfig(format!(
                "{} is an analysis output",
                job.source.display()
            )));
        }

        let target = if job.ad_hoc {
            None
        } else {
            let target = self.storage.resolve_target(&job.source)?;
            tracing::info!(
                "Analyzing {} into {}",
                target.relative_source,
                target.output_file.display()
            );
            Some(target.output_file)
        };

        let progress = |message: String, percent: u8| {
            publish(InsightEvent::Progress {
                request_id: job.request_id.clone(),
                message,
                percent,
            });
        };

        progress("Invoking Codex CLI".to_string(), INVOKING_PERCENT);

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let invocation = async move {
            self.bridge
                .invoke(&job.request, target.as_deref(), cancel, Some(&tx))
                .await
        };
        let forward = async {
            let mut percent = INVOKING_PERCENT;
            while let Some(fragment) = rx.recv().await {
                percent = (percent + 1).min(STREAMING_CEILING);
                progress(clip(&fragment), percent);
            }
        };
        let (result, ()) = tokio::join!(invocation, forward);
        let result = result?;

        progress("Finalizing".to_string(), FINALIZING_PERCENT);
        Ok(result)
    }

    /// The stored analysis for `source`.
    ///
    /// # Errors
    /// `CacheMissing` when nothing is stored, `CacheReadFailed` when the file
    /// cannot be read, `InvalidConfig` for an analysis output.
    pub async fn cached(&self, source: &Path) -> Result<InsightResponse, BridgeError> {
        if self.storage.is_analysis_output(source) {
            return Err(BridgeError::InvalidConfig(format!(
                "{} is an analysis output",
                source.display()
            )));
        }

        let path = self
            .storage
            .find_existing(source)
            .ok_or_else(|| BridgeError::CacheMissing {
                source_file: source.to_path_buf(),
            })?;

        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BridgeError::CacheReadFailed { path, source: e })?;

        Ok(InsightResponse {
            status: STATUS_CACHED.to_string(),
            raw,
        })
    }
}

fn failure_message(error: &BridgeError) -> String {
    if error.is_cancelled() {
        "Analysis cancelled".to_string()
    } else {
        error.to_string()
    }
}

fn clip(fragment: &str) -> String {
    fragment.chars().take(MAX_PROGRESS_CHARS).collect()
}
