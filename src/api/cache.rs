use std::sync::Arc;

use async_graphql::{Context, Object, Result};

use crate::pipeline::RagPipeline;

#[derive(Default)]
pub(super) struct CacheQuery;

#[Object]
impl CacheQuery {
    /// Number of answers stored in the cache, older duplicates included.
    async fn cached_answers(&self, ctx: &Context<'_>) -> Result<usize> {
        let pipeline = ctx.data::<Arc<RagPipeline>>()?;
        Ok(pipeline.cache().len())
    }
}

#[cfg(test)]
mod tests {
    use crate::api::TestSchema;

    #[tokio::test]
    async fn counts_cached_answers() {
        let schema = TestSchema::new();
        let res = schema.execute("{ cachedAnswers }").await;
        assert_eq!(res.data.to_string(), "{cachedAnswers: 0}");

        schema.pipeline.ask("Transformer BLEU score").await.unwrap();

        let res = schema.execute("{ cachedAnswers }").await;
        assert_eq!(res.data.to_string(), "{cachedAnswers: 1}");
    }
}
