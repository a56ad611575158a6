//! Output step: marker restoration.
//!
//! Scans streamed chunks for redaction markers and substitutes the original
//! values through the session store. A marker can straddle chunk boundaries,
//! so a trailing incomplete marker is held in the stream buffer until more
//! data arrives or end-of-stream forces a flush. Markers that do not resolve
//! are left as literal text.

use crate::pipeline::{
    Chunk, ChunkAction, OutputPipelineContext, OutputStep, PipelineContext, PipelineError,
};
use crate::secrets::{incomplete_marker_start, SecretsRedactor};
use async_trait::async_trait;
use std::sync::Arc;

/// Restores `REDACTED<$...>` markers (credentials and PII alike) on egress.
pub struct RestorationStep {
    redactor: Arc<SecretsRedactor>,
}

impl RestorationStep {
    /// Create the step over a shared redactor.
    pub fn new(redactor: Arc<SecretsRedactor>) -> Self {
        Self { redactor }
    }
}

#[async_trait]
impl OutputStep for RestorationStep {
    fn name(&self) -> &'static str {
        "redaction-restore"
    }

    async fn on_chunk(
        &self,
        chunk: Chunk,
        ctx: &mut PipelineContext,
        out: &mut OutputPipelineContext,
    ) -> Result<ChunkAction, PipelineError> {
        let was_holding = !out.is_empty();
        let combined = format!("{}{}", out.take_buffered(), chunk.content);

        match incomplete_marker_start(&combined) {
            // The whole view might still become a marker: keep holding.
            Some(0) => {
                out.push_buffered(combined);
                Ok(ChunkAction::Hold)
            }
            // Emit the settled part, hold the possible marker tail.
            Some(split) => {
                let (ready, tail) = combined.split_at(split);
                let restored = self.redactor.restore(ctx.session, ready);
                out.push_buffered(tail);
                if was_holding {
                    Ok(ChunkAction::Flush(vec![Chunk::new(restored)]))
                } else {
                    Ok(ChunkAction::Emit(vec![Chunk::new(restored)]))
                }
            }
            None => {
                let restored = self.redactor.restore(ctx.session, &combined);
                if was_holding {
                    Ok(ChunkAction::Flush(vec![Chunk::new(restored)]))
                } else {
                    Ok(ChunkAction::Emit(vec![Chunk::new(restored)]))
                }
            }
        }
    }

    async fn on_stream_end(
        &self,
        ctx: &mut PipelineContext,
        out: &mut OutputPipelineContext,
    ) -> Result<Vec<Chunk>, PipelineError> {
        if out.is_empty() {
            return Ok(Vec::new());
        }
        // End of stream: whatever is held is final content, restored on a
        // best-effort basis; an unterminated marker stays literal.
        let rest = out.take_buffered();
        Ok(vec![Chunk::new(self.redactor.restore(ctx.session, &rest))])
    }
}
