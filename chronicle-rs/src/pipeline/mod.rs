//! Ingestion pipeline.
//!
//! Glue around the core components for one submission:
//! 1. **Reserve**: estimate ingestion credits from the chunk count
//! 2. **Preprocess**: chunk, diff, persist episodes, scoped invalidation
//! 3. **Write**: per-episode extraction and graph write ([`EpisodeWriter`])
//! 4. **Resolve**: per-episode resolution under its own reservation
//! 5. **Reconcile**: settle both reservations against actual cost
//! 6. **Follow up**: enqueue downstream jobs, fire-and-forget
//!
//! Ledger bookkeeping failures after graph work are logged, never propagated:
//! the graph is the source of truth.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::driver::{EpisodeStore, GraphStore, VectorIndex};
use crate::edges::Triple;
use crate::errors::{ChronicleError, Result};
use crate::ledger::{AccountKey, CreditLedger, LedgerOperation, LedgerStore, Reservation};
use crate::nodes::{EpisodeType, EpisodicNode};
use crate::preprocess::{DifferentialStrategy, EpisodePreprocessor, EpisodeSubmission};
use crate::resolution::{Adjudicator, ResolutionEngine, ResolutionReport};
use crate::types::{BillingConfig, ChronicleConfig};

/// Triples persisted for one episode, and what producing them cost.
#[derive(Debug, Clone, Default)]
pub struct EpisodeWrite {
    pub triples: Vec<Triple>,
    pub credits_used: u64,
}

/// Extracts triples from an episode and writes them durably.
#[allow(async_fn_in_trait)]
pub trait EpisodeWriter: Send + Sync {
    async fn write_episode(&self, episode: &EpisodicNode) -> Result<EpisodeWrite>;
}

/// Downstream work triggered by an ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FollowUpJob {
    AssignLabels { user_id: String, session_id: String },
    GenerateTitle { user_id: String, session_id: String },
    CompactSession { user_id: String, session_id: String },
    AnalyzeTopics { user_id: String, session_id: String },
    RefreshPersona { user_id: String },
}

/// Fire-and-forget job sink.
#[allow(async_fn_in_trait)]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: FollowUpJob) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestionStatus {
    Completed,
    /// Content identical to the previous version.
    Skipped,
    InsufficientCredits,
    Failed { message: String },
}

/// What one submission did.
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub status: IngestionStatus,
    pub strategy: Option<DifferentialStrategy>,
    pub episodes: Vec<Uuid>,
    pub invalidated_statements: usize,
    pub resolutions: Vec<ResolutionReport>,
    /// Episodes whose resolution was not run for lack of credits.
    pub deferred_resolutions: Vec<Uuid>,
    pub ingestion_credits: u64,
    pub resolution_credits: u64,
}

impl IngestionReport {
    fn with_status(status: IngestionStatus) -> Self {
        Self {
            status,
            strategy: None,
            episodes: Vec::new(),
            invalidated_statements: 0,
            resolutions: Vec::new(),
            deferred_resolutions: Vec::new(),
            ingestion_credits: 0,
            resolution_credits: 0,
        }
    }
}

/// Sequences preprocessing, writing, resolution and billing.
pub struct IngestionPipeline<S, W, A, L, Q> {
    preprocessor: EpisodePreprocessor<S>,
    engine: ResolutionEngine<S, S, A>,
    writer: W,
    ledger: CreditLedger<L>,
    jobs: Q,
    billing: BillingConfig,
}

impl<S, W, A, L, Q> IngestionPipeline<S, W, A, L, Q>
where
    S: GraphStore + VectorIndex + EpisodeStore,
    W: EpisodeWriter,
    A: Adjudicator,
    L: LedgerStore,
    Q: JobQueue,
{
    pub fn new(
        store: Arc<S>,
        writer: W,
        adjudicator: A,
        ledger: L,
        jobs: Q,
        config: &ChronicleConfig,
    ) -> Self {
        Self {
            preprocessor: EpisodePreprocessor::new(
                store.clone(),
                config.chunker.clone(),
                config.differ.clone(),
            ),
            engine: ResolutionEngine::new(
                store.clone(),
                store,
                adjudicator,
                config.resolution.clone(),
            ),
            writer,
            ledger: CreditLedger::new(ledger, config.billing.enabled),
            jobs,
            billing: config.billing.clone(),
        }
    }

    pub fn ledger(&self) -> &CreditLedger<L> {
        &self.ledger
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Ingest one submission for `account`.
    pub async fn ingest(&self, account: &AccountKey, submission: &EpisodeSubmission) -> IngestionReport {
        let chunked = self.preprocessor.chunk(submission);
        let estimate = (chunked.total_chunks as u64).saturating_mul(self.billing.credits_per_chunk);

        let reservation = match self.ledger.reserve(account, estimate).await {
            Ok(r) => r,
            Err(e) if e.is_insufficient() => {
                info!(%account, estimate, reason = %e, "ingestion refused: no credits");
                return IngestionReport::with_status(IngestionStatus::InsufficientCredits);
            }
            Err(e) => {
                return IngestionReport::with_status(IngestionStatus::Failed {
                    message: ChronicleError::from(e).to_string(),
                })
            }
        };

        let prepared = match self.preprocessor.preprocess_chunked(submission, chunked).await {
            Ok(p) => p,
            Err(e) => {
                self.refund(account, reservation).await;
                return IngestionReport::with_status(IngestionStatus::Failed {
                    message: e.to_string(),
                });
            }
        };

        let mut report = IngestionReport::with_status(IngestionStatus::Completed);
        report.strategy = Some(prepared.strategy);
        report.invalidated_statements = prepared.invalidated_statements;
        report.episodes = prepared.episodes.iter().map(|e| e.uuid).collect();

        if prepared.episodes.is_empty() {
            self.refund(account, reservation).await;
            report.status = IngestionStatus::Skipped;
            return report;
        }

        let mut written: Vec<(EpisodicNode, Vec<Triple>)> = Vec::new();
        for episode in &prepared.episodes {
            match self.writer.write_episode(episode).await {
                Ok(write) => {
                    report.ingestion_credits += write.credits_used;
                    written.push((episode.clone(), write.triples));
                }
                Err(e) => {
                    warn!(episode = %episode.uuid, error = %e, "episode write failed");
                    self.settle(account, LedgerOperation::Ingestion, reservation, report.ingestion_credits)
                        .await;
                    report.status = IngestionStatus::Failed {
                        message: e.to_string(),
                    };
                    return report;
                }
            }
        }
        self.settle(account, LedgerOperation::Ingestion, reservation, report.ingestion_credits)
            .await;

        for (episode, triples) in written {
            self.resolve(account, &episode, triples, &mut report).await;
        }

        self.enqueue_follow_ups(submission).await;

        info!(
            session = %submission.session_id,
            strategy = ?prepared.strategy,
            episodes = report.episodes.len(),
            deferred = report.deferred_resolutions.len(),
            credits = report.ingestion_credits + report.resolution_credits,
            "ingestion complete"
        );
        report
    }

    async fn resolve(
        &self,
        account: &AccountKey,
        episode: &EpisodicNode,
        triples: Vec<Triple>,
        report: &mut IngestionReport,
    ) {
        // One adjudication call per pass at most.
        let estimate = self.billing.credits_per_adjudication.saturating_mul(2);
        let reservation = match self.ledger.reserve(account, estimate).await {
            Ok(r) => r,
            Err(e) => {
                warn!(episode = %episode.uuid, reason = %e, "resolution deferred");
                report.deferred_resolutions.push(episode.uuid);
                return;
            }
        };

        let resolution = self.engine.resolve_episode(episode, triples).await;
        let actual = resolution
            .usage
            .credits(self.billing.credits_per_adjudication);
        self.settle(account, LedgerOperation::Resolution, reservation, actual)
            .await;
        report.resolution_credits += actual;
        report.resolutions.push(resolution);
    }

    async fn refund(&self, account: &AccountKey, reservation: Reservation) {
        if let Err(e) = self.ledger.refund(account, reservation.debited).await {
            warn!(%account, error = %e, "refund failed");
        }
    }

    async fn settle(
        &self,
        account: &AccountKey,
        operation: LedgerOperation,
        reservation: Reservation,
        actual: u64,
    ) {
        if let Err(e) = self
            .ledger
            .reconcile(account, operation, reservation.debited, actual)
            .await
        {
            warn!(%account, ?operation, error = %e, "reconcile failed");
        }
    }

    async fn enqueue_follow_ups(&self, submission: &EpisodeSubmission) {
        for job in follow_up_jobs(submission) {
            if let Err(e) = self.jobs.enqueue(job.clone()).await {
                warn!(?job, error = %e, "follow-up enqueue failed");
            }
        }
    }
}

/// Jobs triggered by a submission.
pub fn follow_up_jobs(submission: &EpisodeSubmission) -> Vec<FollowUpJob> {
    let user_id = submission.user_id.clone();
    let session_id = submission.session_id.clone();
    let mut jobs = vec![FollowUpJob::AssignLabels {
        user_id: user_id.clone(),
        session_id: session_id.clone(),
    }];
    if submission.title.is_none() {
        jobs.push(FollowUpJob::GenerateTitle {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
        });
    }
    if submission.episode_type == EpisodeType::Conversation && !submission.revision {
        jobs.push(FollowUpJob::CompactSession {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
        });
    }
    jobs.push(FollowUpJob::AnalyzeTopics {
        user_id: user_id.clone(),
        session_id,
    });
    jobs.push(FollowUpJob::RefreshPersona { user_id });
    jobs
}
