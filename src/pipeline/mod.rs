//! Staged inspection pipeline over requests and response chunk streams.
//!
//! Two pipelines per request lifecycle:
//!
//! - **Input**: ordered steps over the whole normalized request, strictly
//!   sequential over one shared [`PipelineContext`]. A step passes the
//!   request on (possibly mutated), short-circuits with a direct response, or
//!   fails (fatal for the request). The final, possibly-redacted request is
//!   recorded into the context only after all steps ran.
//! - **Output**: ordered steps over a live chunk stream. Each step returns an
//!   explicit [`ChunkAction`]: emit chunks, hold its view of the content in
//!   the per-stream buffer, or flush previously held content. On stream end
//!   any remaining buffered content is flushed as one final synthetic chunk —
//!   no content is silently dropped.
//!
//! Output-step errors are contained: the engine logs them and passes the
//! chunk through unmodified, because losing response content is worse than
//! skipping one inspection.

mod context;
mod error;
pub mod select;
pub mod steps;

pub use context::{
    Alert, AlertSeverity, ClientKind, CodeSnippet, DirectResponse, GatewayRequest,
    OutputPipelineContext, PipelineContext, RequestKind,
};
pub use error::PipelineError;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What an input step decided.
pub enum InputAction {
    /// Hand the (possibly mutated) request to the next step.
    Continue(GatewayRequest),
    /// End the pipeline with a direct response; nothing reaches upstream.
    Shortcut(DirectResponse),
}

/// One stage of the input pipeline.
#[async_trait]
pub trait InputStep: Send + Sync {
    /// Stable step name (used in alerts and logs).
    fn name(&self) -> &'static str;

    /// Inspect and possibly mutate the request.
    async fn process(
        &self,
        request: GatewayRequest,
        ctx: &mut PipelineContext,
    ) -> Result<InputAction, PipelineError>;
}

/// A fragment of streamed response content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The fragment text.
    pub content: String,
}

impl Chunk {
    /// Create a chunk.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// What an output step decided for one chunk.
///
/// The three states make the reason for withholding content explicit instead
/// of inferring it from an empty list.
pub enum ChunkAction {
    /// Emit these chunks to the next step (zero or more).
    Emit(Vec<Chunk>),
    /// Withhold; the step stored content in the stream buffer and needs more
    /// context before it can rewrite.
    Hold,
    /// Emit previously held content together with the current rewrite.
    Flush(Vec<Chunk>),
}

/// One stage of the output pipeline.
#[async_trait]
pub trait OutputStep: Send + Sync {
    /// Stable step name (used in alerts and logs).
    fn name(&self) -> &'static str;

    /// Process one chunk of the response stream.
    async fn on_chunk(
        &self,
        chunk: Chunk,
        ctx: &mut PipelineContext,
        out: &mut OutputPipelineContext,
    ) -> Result<ChunkAction, PipelineError>;

    /// Called once when the stream ends, before the engine flushes whatever
    /// is left in the buffer. Chunks returned here flow through the steps
    /// after this one.
    async fn on_stream_end(
        &self,
        _ctx: &mut PipelineContext,
        _out: &mut OutputPipelineContext,
    ) -> Result<Vec<Chunk>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Outcome of running the input pipeline.
pub enum InputOutcome {
    /// Forward this request upstream.
    Forward(GatewayRequest),
    /// Answer the client directly.
    Direct(DirectResponse),
}

/// Ordered input steps; an empty pipeline is a no-op.
#[derive(Default)]
pub struct InputPipeline {
    steps: Vec<Arc<dyn InputStep>>,
}

impl InputPipeline {
    /// Build a pipeline from ordered steps.
    pub fn new(steps: Vec<Arc<dyn InputStep>>) -> Self {
        Self { steps }
    }

    /// Run every step in registration order over one context.
    ///
    /// # Errors
    ///
    /// The first step error aborts the entire request; later steps are not
    /// applied.
    pub async fn run(
        &self,
        mut request: GatewayRequest,
        ctx: &mut PipelineContext,
    ) -> Result<InputOutcome, PipelineError> {
        for step in &self.steps {
            trace!("Input step '{}'", step.name());
            match step.process(request, ctx).await? {
                InputAction::Continue(next) => request = next,
                InputAction::Shortcut(response) => {
                    debug!("Input step '{}' short-circuited the request", step.name());
                    ctx.shortcut = true;
                    return Ok(InputOutcome::Direct(response));
                }
            }
        }

        // Recorded only now, so the record reflects every redaction.
        ctx.recorded_input = Some(request.body.clone());
        Ok(InputOutcome::Forward(request))
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when no steps are registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Ordered output steps; an empty pipeline passes chunks through untouched.
#[derive(Default)]
pub struct OutputPipeline {
    steps: Vec<Arc<dyn OutputStep>>,
}

impl OutputPipeline {
    /// Build a pipeline from ordered steps.
    pub fn new(steps: Vec<Arc<dyn OutputStep>>) -> Self {
        Self { steps }
    }

    /// Run one incoming chunk through all steps, left to right.
    ///
    /// Returns the chunks to send to the client for this cycle (possibly
    /// none, when a step is holding). Emitted content is recorded on the
    /// context.
    pub async fn process_chunk(
        &self,
        chunk: Chunk,
        ctx: &mut PipelineContext,
        out: &mut OutputPipelineContext,
    ) -> Vec<Chunk> {
        let produced = self.run_from(0, chunk, ctx, out).await;
        for c in &produced {
            ctx.recorded_output.push(c.content.clone());
        }
        produced
    }

    /// Signal end of stream: every step gets its end-of-stream callback, then
    /// any content still in the buffer is flushed as one synthetic chunk.
    pub async fn finish(
        &self,
        ctx: &mut PipelineContext,
        out: &mut OutputPipelineContext,
    ) -> Vec<Chunk> {
        let mut produced = Vec::new();

        for (idx, step) in self.steps.iter().enumerate() {
            match step.on_stream_end(ctx, out).await {
                Ok(chunks) => {
                    for chunk in chunks {
                        produced.extend(self.run_from(idx + 1, chunk, ctx, out).await);
                    }
                }
                Err(e) => warn!("Output step '{}' failed at stream end: {e}", step.name()),
            }
        }

        // Nothing may be silently dropped.
        if !out.is_empty() {
            produced.push(Chunk::new(out.take_buffered()));
        }

        for c in &produced {
            ctx.recorded_output.push(c.content.clone());
        }
        produced
    }

    /// Feed one chunk through the steps starting at `start`.
    async fn run_from(
        &self,
        start: usize,
        chunk: Chunk,
        ctx: &mut PipelineContext,
        out: &mut OutputPipelineContext,
    ) -> Vec<Chunk> {
        let mut current = vec![chunk];

        for step in &self.steps[start..] {
            let mut next = Vec::new();
            for c in current {
                let backup = c.clone();
                match step.on_chunk(c, ctx, out).await {
                    Ok(ChunkAction::Emit(chunks)) | Ok(ChunkAction::Flush(chunks)) => {
                        next.extend(chunks);
                    }
                    Ok(ChunkAction::Hold) => {}
                    Err(e) => {
                        // Contained: pass the original chunk through rather
                        // than lose response content.
                        warn!("Output step '{}' failed: {e}", step.name());
                        next.push(backup);
                    }
                }
            }
            if next.is_empty() {
                return Vec::new();
            }
            current = next;
        }

        current
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when no steps are registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
