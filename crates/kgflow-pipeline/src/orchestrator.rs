//! Streaming orchestrator
//!
//! A run has two streaming phases separated by the entity deduplication
//! barrier. Phase one moves chunks through entity extraction and chunk
//! embedding to the terminal consumer. Once every chunk of the document has
//! arrived, entities are deduplicated in one pass. Phase two asks the
//! relation extractor about each chunk, given that chunk's canonical
//! entities, and the collected relations are deduplicated and written.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::chunk::{ChunkRelations, ProcessedChunk, RelationTask};
use crate::events::ErrorLog;
use crate::queue::{bounded, QueueReceiver};
use crate::report::{RunOutcome, RunReport, RunStats};
use crate::sink::{ChunkConsumer, NoopConsumer};
use crate::stage::{collect, feed, join_all, spawn_stage, StageContext};
use crate::state::{RunState, RunStateTracker};
use crate::timeout::{with_timeout, TimeoutEmbedder};
use kgflow_core::{
    Chunk, EmbeddingClient, EntityIndex, EntityMapping, ErrorKind, GraphSink, KgError,
    KnowledgeGraph, PipelineConfig, Result, RunEvent, Stage,
};
use kgflow_extractor::{
    normalize_endpoints, EntityDeduplicator, Extractor, RelationDeduplicator,
    RelationVocabulary, RuleBasedNer,
};

/// Streaming extraction and deduplication pipeline for one document per run
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    entity_extractor: Arc<dyn Extractor>,
    relation_extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn EmbeddingClient>,
    entity_dedup: Arc<EntityDeduplicator>,
    relation_dedup: Arc<RelationDeduplicator>,
    consumer: Arc<dyn ChunkConsumer>,
    sink: Option<Arc<dyn GraphSink>>,
}

impl Pipeline {
    /// Create a pipeline with the rule-based recognizer, the built-in
    /// relation vocabulary, no chunk consumer and no graph sink
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<dyn EmbeddingClient>,
        relation_extractor: Arc<dyn Extractor>,
    ) -> Self {
        let embedder: Arc<dyn EmbeddingClient> =
            Arc::new(TimeoutEmbedder::new(embedder, config.model_timeout_secs));
        let entity_dedup = EntityDeduplicator::new(Arc::clone(&embedder))
            .with_threshold(config.similarity_threshold)
            .with_batch_size(config.embedding_batch_size);

        Self {
            config,
            entity_extractor: Arc::new(RuleBasedNer::new()),
            relation_extractor,
            embedder,
            entity_dedup: Arc::new(entity_dedup),
            relation_dedup: Arc::new(RelationDeduplicator::default()),
            consumer: Arc::new(NoopConsumer),
            sink: None,
        }
    }

    /// Replace the entity extractor
    pub fn with_entity_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.entity_extractor = extractor;
        self
    }

    /// Use a relation vocabulary loaded at startup
    pub fn with_vocabulary(mut self, vocabulary: Arc<RelationVocabulary>) -> Self {
        self.relation_dedup = Arc::new(RelationDeduplicator::new(vocabulary));
        self
    }

    /// Set the terminal chunk consumer
    pub fn with_consumer(mut self, consumer: Arc<dyn ChunkConsumer>) -> Self {
        self.consumer = consumer;
        self
    }

    /// Set the graph sink
    pub fn with_sink(mut self, sink: Arc<dyn GraphSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a run over `chunks` on the current runtime
    pub fn start<S>(&self, chunks: S) -> RunHandle
    where
        S: Stream<Item = Chunk> + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let tracker = RunStateTracker::new();
        let state = tracker.subscribe();

        if let Err(e) = tracker.transition(RunState::Running) {
            tracing::error!(run_id = %run_id, error = %e, "Run state machine rejected start");
        }

        let pipeline = self.clone();
        let user_cancel = cancel.clone();
        let chunks = chunks.boxed();
        let task = tokio::spawn(
            async move { pipeline.execute(run_id, chunks, user_cancel, tracker).await }
                .instrument(tracing::info_span!("pipeline_run", run_id = %run_id)),
        );

        RunHandle {
            run_id,
            state,
            cancel,
            task,
        }
    }

    /// Run to completion
    pub async fn run<S>(&self, chunks: S) -> RunOutcome
    where
        S: Stream<Item = Chunk> + Send + 'static,
    {
        self.start(chunks).wait().await
    }

    /// Run to completion over an in-memory list of chunks
    pub async fn run_chunks(&self, chunks: Vec<Chunk>) -> RunOutcome {
        self.run(stream::iter(chunks)).await
    }

    async fn execute(
        self,
        run_id: Uuid,
        chunks: BoxStream<'static, Chunk>,
        user_cancel: CancellationToken,
        tracker: RunStateTracker,
    ) -> RunOutcome {
        let started_at = Utc::now();
        let errors = ErrorLog::new(run_id);
        let ctx = StageContext {
            run_id,
            cancel: user_cancel.child_token(),
            errors: errors.clone(),
        };
        let mut stats = RunStats::default();

        tracing::info!(
            run_id = %run_id,
            queue_max_depth = self.config.queue_max_depth,
            extraction_workers = self.config.extraction_worker_count,
            embedding_workers = self.config.embedding_worker_count,
            "Pipeline run started"
        );

        let result = self.drive(&ctx, &user_cancel, chunks, &mut stats).await;
        stats.item_errors = errors.len();
        let events = errors.snapshot();

        let cancelled = user_cancel.is_cancelled()
            && matches!(&result, Ok(None) | Err(KgError::Cancelled));

        let (state, outcome) = match result {
            Ok(Some((graph, mapping))) => {
                tracing::info!(
                    run_id = %run_id,
                    entities = graph.entities.len(),
                    relations = graph.relations.len(),
                    item_errors = stats.item_errors,
                    "Pipeline run completed"
                );
                let report = RunReport {
                    run_id,
                    graph,
                    mapping,
                    events,
                    stats,
                    started_at,
                    finished_at: Utc::now(),
                };
                (RunState::Completed, RunOutcome::Completed(report))
            }
            _ if cancelled => {
                tracing::info!(
                    run_id = %run_id,
                    dropped = stats.dropped_on_cancel,
                    "Pipeline run cancelled"
                );
                (
                    RunState::Cancelled,
                    RunOutcome::Cancelled {
                        run_id,
                        events,
                        stats,
                    },
                )
            }
            Ok(None) => (
                RunState::Failed,
                RunOutcome::Failed {
                    run_id,
                    error: KgError::Cancelled,
                    events,
                },
            ),
            Err(error) => {
                tracing::error!(run_id = %run_id, error = %error, "Pipeline run failed");
                (
                    RunState::Failed,
                    RunOutcome::Failed {
                        run_id,
                        error,
                        events,
                    },
                )
            }
        };

        if let Err(e) = tracker.transition(state) {
            tracing::error!(run_id = %run_id, error = %e, "Run state machine rejected finish");
        }
        outcome
    }

    /// Returns `Ok(None)` when the run was cancelled
    async fn drive(
        &self,
        ctx: &StageContext,
        user_cancel: &CancellationToken,
        chunks: BoxStream<'static, Chunk>,
        stats: &mut RunStats,
    ) -> Result<Option<(KnowledgeGraph, EntityMapping)>> {
        self.config.validate()?;

        let Some(mut processed) = self.extract_entities(ctx, user_cancel, chunks, stats).await?
        else {
            return Ok(None);
        };

        // ---- dedup barrier -------------------------------------------------
        processed.sort_by(|a, b| {
            (a.chunk.source_id.as_str(), a.chunk.chunk_index)
                .cmp(&(b.chunk.source_id.as_str(), b.chunk.chunk_index))
        });
        stats.chunks_embedded = processed.iter().filter(|p| p.embedding.is_some()).count();

        let raw_entities: Vec<_> = processed
            .iter()
            .flat_map(|p| p.entities.iter().cloned())
            .collect();
        stats.raw_entities = raw_entities.len();

        let deduplicated = tokio::select! {
            biased;
            _ = user_cancel.cancelled() => return Ok(None),
            result = self.entity_dedup.deduplicate(raw_entities) => result,
        };
        let (canonical, mapping) = deduplicated?;
        stats.canonical_entities = canonical.len();

        tracing::info!(
            run_id = %ctx.run_id,
            chunks = processed.len(),
            raw_entities = stats.raw_entities,
            canonical_entities = stats.canonical_entities,
            "Entity deduplication barrier passed"
        );

        let source_id = processed
            .first()
            .map(|p| p.chunk.source_id.clone())
            .unwrap_or_default();
        let index = EntityIndex::from_entities(canonical);

        let relation_tasks: Vec<RelationTask> = processed
            .into_iter()
            .enumerate()
            .map(|(position, p)| {
                let entities = index.canonical_for(&mapping, p.entities.iter().map(|e| e.name.as_str()));
                RelationTask {
                    position,
                    chunk: p.chunk,
                    entities,
                }
            })
            .filter(|task| !task.entities.is_empty())
            .collect();

        let Some(raw_relations) = self
            .extract_relations(ctx, user_cancel, relation_tasks, stats)
            .await?
        else {
            return Ok(None);
        };
        stats.raw_relations = raw_relations.len();

        let relations = if self.config.enable_relation_dedup {
            self.relation_dedup.deduplicate(raw_relations, &mapping)
        } else {
            tracing::info!(run_id = %ctx.run_id, "Relation deduplication bypassed");
            normalize_endpoints(raw_relations, &mapping)
        };
        stats.final_relations = relations.len();

        let graph = KnowledgeGraph {
            source_id,
            entities: index.into_entities(),
            relations,
        };

        if let Some(sink) = &self.sink {
            let written = tokio::select! {
                biased;
                _ = user_cancel.cancelled() => return Ok(None),
                result = sink.write(&graph) => result,
            };
            written.map_err(|e| match e {
                KgError::Sink(message) => KgError::Sink(message),
                other => KgError::Sink(format!("{}: {other}", sink.name())),
            })?;
        }

        Ok(Some((graph, mapping)))
    }

    /// Phase one: chunks -> entity extraction -> embedding -> consumer
    async fn extract_entities(
        &self,
        ctx: &StageContext,
        user_cancel: &CancellationToken,
        chunks: BoxStream<'static, Chunk>,
        stats: &mut RunStats,
    ) -> Result<Option<Vec<ProcessedChunk>>> {
        let depth = self.config.queue_max_depth;
        let (chunk_tx, chunk_rx) = bounded::<Chunk>(depth);
        let (extracted_tx, extracted_rx) = bounded::<ProcessedChunk>(depth);
        let (embedded_tx, embedded_rx) = bounded::<ProcessedChunk>(depth);
        let mut tasks = JoinSet::new();

        // producer
        let received = Arc::new(AtomicUsize::new(0));
        {
            let cancel = ctx.cancel.clone();
            let errors = ctx.errors.clone();
            let received = Arc::clone(&received);
            let valid = chunks.filter_map(move |chunk| {
                received.fetch_add(1, Ordering::Relaxed);
                let kept = match validate_chunk(&chunk) {
                    Ok(()) => Some(chunk),
                    Err(e) => {
                        errors.record_error(Stage::Chunking, &chunk.item_id(), &e);
                        None
                    }
                };
                futures::future::ready(kept)
            });
            tasks.spawn(async move {
                let result = feed(&cancel, &chunk_tx, Box::pin(valid)).await.map(|_| ());
                if result.is_err() {
                    cancel.cancel();
                }
                result
            });
        }

        // entity extraction
        {
            let extractor = Arc::clone(&self.entity_extractor);
            let errors = ctx.errors.clone();
            let secs = self.config.model_timeout_secs;
            spawn_stage(
                &mut tasks,
                ctx,
                Stage::EntityExtraction,
                self.config.extraction_worker_count,
                chunk_rx.clone(),
                extracted_tx,
                move |chunk: Chunk| {
                    let extractor = Arc::clone(&extractor);
                    let errors = errors.clone();
                    async move {
                        let item_id = chunk.item_id();
                        let result =
                            with_timeout(secs, "entity extraction", extractor.extract(&chunk, &[]))
                                .await;

                        let mut processed = ProcessedChunk::new(chunk);
                        match result {
                            Ok(extraction) => processed.entities = extraction.entities,
                            Err(e) => errors.record_error(Stage::EntityExtraction, &item_id, &e),
                        }
                        tracing::debug!(
                            item_id = %item_id,
                            entities = processed.entities.len(),
                            "Entities extracted"
                        );
                        Some(processed)
                    }
                },
            );
        }

        // chunk embedding
        {
            let embedder = Arc::clone(&self.embedder);
            let errors = ctx.errors.clone();
            let embed_chunks = self.config.embed_chunks;
            spawn_stage(
                &mut tasks,
                ctx,
                Stage::Embedding,
                self.config.embedding_worker_count,
                extracted_rx.clone(),
                embedded_tx,
                move |mut item: ProcessedChunk| {
                    let embedder = Arc::clone(&embedder);
                    let errors = errors.clone();
                    async move {
                        if !embed_chunks || item.chunk.text.trim().is_empty() {
                            return Some(item);
                        }

                        let result = embedder.embed(std::slice::from_ref(&item.chunk.text)).await;
                        match result {
                            Ok(mut vectors) if vectors.len() == 1 => item.embedding = vectors.pop(),
                            Ok(vectors) => errors.record_error(
                                Stage::Embedding,
                                &item.item_id(),
                                &KgError::Embedding(format!(
                                    "expected 1 vector, got {}",
                                    vectors.len()
                                )),
                            ),
                            Err(e) => errors.record_error(Stage::Embedding, &item.item_id(), &e),
                        }
                        Some(item)
                    }
                },
            );
        }

        // terminal consumer
        let collector = {
            let cancel = ctx.cancel.clone();
            let errors = ctx.errors.clone();
            let consumer = Arc::clone(&self.consumer);
            let input = embedded_rx.clone();
            tokio::spawn(async move { consume_chunks(&cancel, &input, consumer.as_ref(), &errors).await })
        };

        let collected = self.settle_collector(ctx, collector).await;
        let settled = self.settle(ctx, &mut tasks).await;
        stats.chunks = received.load(Ordering::Relaxed);

        if user_cancel.is_cancelled() {
            stats.dropped_on_cancel +=
                chunk_rx.drain().await + extracted_rx.drain().await + embedded_rx.drain().await;
            return Ok(None);
        }
        settled?;
        let collected = collected?;
        if ctx.cancel.is_cancelled() {
            return Err(KgError::Cancelled);
        }

        tracing::info!(
            run_id = %ctx.run_id,
            chunks = collected.len(),
            "Entity extraction phase complete"
        );
        Ok(Some(collected))
    }

    /// Phase two: relation extraction per chunk
    async fn extract_relations(
        &self,
        ctx: &StageContext,
        user_cancel: &CancellationToken,
        relation_tasks: Vec<RelationTask>,
        stats: &mut RunStats,
    ) -> Result<Option<Vec<kgflow_core::Relation>>> {
        let depth = self.config.queue_max_depth;
        let (task_tx, task_rx) = bounded::<RelationTask>(depth);
        let (relations_tx, relations_rx) = bounded::<ChunkRelations>(depth);
        let mut tasks = JoinSet::new();

        {
            let cancel = ctx.cancel.clone();
            tasks.spawn(async move {
                let result = feed(&cancel, &task_tx, stream::iter(relation_tasks))
                    .await
                    .map(|_| ());
                if result.is_err() {
                    cancel.cancel();
                }
                result
            });
        }

        {
            let extractor = Arc::clone(&self.relation_extractor);
            let errors = ctx.errors.clone();
            let secs = self.config.model_timeout_secs;
            spawn_stage(
                &mut tasks,
                ctx,
                Stage::RelationExtraction,
                self.config.extraction_worker_count,
                task_rx.clone(),
                relations_tx,
                move |task: RelationTask| {
                    let extractor = Arc::clone(&extractor);
                    let errors = errors.clone();
                    async move {
                        let item_id = task.chunk.item_id();
                        let result = with_timeout(
                            secs,
                            "relation extraction",
                            extractor.extract(&task.chunk, &task.entities),
                        )
                        .await;

                        let relations = match result {
                            Ok(extraction) => extraction.relations,
                            Err(e) => {
                                errors.record_error(Stage::RelationExtraction, &item_id, &e);
                                Vec::new()
                            }
                        };
                        tracing::debug!(
                            item_id = %item_id,
                            relations = relations.len(),
                            "Relations extracted"
                        );
                        Some(ChunkRelations {
                            position: task.position,
                            relations,
                        })
                    }
                },
            );
        }

        let collector = {
            let cancel = ctx.cancel.clone();
            let input = relations_rx.clone();
            tokio::spawn(async move { collect(&cancel, &input).await })
        };

        let collected = self.settle_collector(ctx, collector).await;
        let settled = self.settle(ctx, &mut tasks).await;

        if user_cancel.is_cancelled() {
            stats.dropped_on_cancel += task_rx.drain().await + relations_rx.drain().await;
            return Ok(None);
        }
        settled?;
        let mut collected = collected?;
        if ctx.cancel.is_cancelled() {
            return Err(KgError::Cancelled);
        }

        // document order keeps relation dedup deterministic
        collected.sort_by_key(|c| c.position);
        Ok(Some(
            collected.into_iter().flat_map(|c| c.relations).collect(),
        ))
    }

    async fn settle_collector<T>(&self, ctx: &StageContext, collector: JoinHandle<T>) -> Result<T> {
        collector.await.map_err(|e| {
            ctx.cancel.cancel();
            KgError::Other(anyhow::anyhow!("collector task failed: {e}"))
        })
    }

    /// Wait for a stage group. After cancellation, workers get the grace
    /// period to unwind before they are aborted.
    async fn settle(&self, ctx: &StageContext, tasks: &mut JoinSet<Result<()>>) -> Result<()> {
        if !ctx.cancel.is_cancelled() {
            return join_all(tasks).await;
        }

        let grace = Duration::from_millis(self.config.cancel_grace_period_ms);
        match tokio::time::timeout(grace, join_all(tasks)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    remaining = tasks.len(),
                    "Workers still running after grace period, aborting"
                );
                tasks.abort_all();
                join_all(tasks).await
            }
        }
    }
}

/// Reject chunks no stage can process
fn validate_chunk(chunk: &Chunk) -> Result<()> {
    if chunk.page_range.0 > chunk.page_range.1 {
        return Err(KgError::InvalidInput(format!(
            "page range {}-{} is reversed",
            chunk.page_range.0, chunk.page_range.1
        )));
    }
    if chunk.text.contains('\0') {
        return Err(KgError::InvalidInput("chunk text contains NUL bytes".to_string()));
    }
    Ok(())
}

async fn consume_chunks(
    cancel: &CancellationToken,
    input: &QueueReceiver<ProcessedChunk>,
    consumer: &dyn ChunkConsumer,
    errors: &ErrorLog,
) -> Vec<ProcessedChunk> {
    let mut collected = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = input.recv() => item,
        };
        let Some(item) = next else { break };

        let consumed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = consumer.consume(&item) => result,
        };
        if let Err(e) = consumed {
            errors.record(RunEvent::new(
                Stage::Consumer,
                item.item_id(),
                ErrorKind::Sink,
                format!("{}: {e}", consumer.name()),
            ));
        }
        collected.push(item);
    }
    collected
}

// ============================================================================
// Run handle
// ============================================================================

/// Handle to a running pipeline
pub struct RunHandle {
    run_id: Uuid,
    state: watch::Receiver<RunState>,
    cancel: CancellationToken,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Ask every worker to stop. The run ends as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run when triggered, e.g. from a signal handler
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end
    pub async fn wait(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed {
                run_id: self.run_id,
                error: KgError::Other(anyhow::anyhow!("pipeline task failed: {e}")),
                events: Vec::new(),
            },
        }
    }
}
