//! Output step: end-of-stream redaction notice.

use crate::pipeline::{
    Chunk, ChunkAction, OutputPipelineContext, OutputStep, PipelineContext, PipelineError,
};
use async_trait::async_trait;

/// Appends a single notice chunk at end of stream when the input pipeline
/// redacted sensitive values, so the user knows the provider never saw them.
pub struct NotificationStep;

#[async_trait]
impl OutputStep for NotificationStep {
    fn name(&self) -> &'static str {
        "redaction-notify"
    }

    async fn on_chunk(
        &self,
        chunk: Chunk,
        _ctx: &mut PipelineContext,
        _out: &mut OutputPipelineContext,
    ) -> Result<ChunkAction, PipelineError> {
        Ok(ChunkAction::Emit(vec![chunk]))
    }

    async fn on_stream_end(
        &self,
        ctx: &mut PipelineContext,
        _out: &mut OutputPipelineContext,
    ) -> Result<Vec<Chunk>, PipelineError> {
        let secrets: usize = ctx
            .metadata
            .get("secrets_redacted")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let pii: usize = ctx
            .metadata
            .get("pii_redacted")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if secrets + pii == 0 {
            return Ok(Vec::new());
        }

        let mut parts = Vec::new();
        if secrets > 0 {
            parts.push(format!("{secrets} credential(s)"));
        }
        if pii > 0 {
            parts.push(format!("{pii} PII item(s)"));
        }

        Ok(vec![Chunk::new(format!(
            "\n\n[modelgate] {} redacted before reaching the provider\n",
            parts.join(" and ")
        ))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OutputPipeline;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_notice_appended_when_redactions_happened() {
        let pipeline = OutputPipeline::new(vec![Arc::new(NotificationStep)]);
        let mut ctx = PipelineContext::new(Uuid::new_v4());
        ctx.metadata
            .insert("secrets_redacted".to_string(), "2".to_string());
        let mut out = OutputPipelineContext::new();

        let body = pipeline
            .process_chunk(Chunk::new("answer"), &mut ctx, &mut out)
            .await;
        assert_eq!(body.len(), 1);

        let finale = pipeline.finish(&mut ctx, &mut out).await;
        assert_eq!(finale.len(), 1);
        assert!(finale[0].content.contains("2 credential(s)"));
    }

    #[tokio::test]
    async fn test_silent_when_nothing_redacted() {
        let pipeline = OutputPipeline::new(vec![Arc::new(NotificationStep)]);
        let mut ctx = PipelineContext::new(Uuid::new_v4());
        let mut out = OutputPipelineContext::new();

        pipeline
            .process_chunk(Chunk::new("answer"), &mut ctx, &mut out)
            .await;
        let finale = pipeline.finish(&mut ctx, &mut out).await;
        assert!(finale.is_empty());
    }
}
