mod ask;
mod cache;

use std::sync::Arc;

use async_graphql::{EmptyMutation, EmptySubscription, MergedObject};

use crate::pipeline::RagPipeline;

/// A set of queries defined in the schema.
///
/// This is exposed only for [`Schema`], and not used directly.
#[derive(Default, MergedObject)]
pub(crate) struct Query(ask::AskQuery, cache::CacheQuery);

pub(crate) type Schema = async_graphql::Schema<Query, EmptyMutation, EmptySubscription>;

pub(crate) fn schema(pipeline: Arc<RagPipeline>) -> Schema {
    Schema::build(Query::default(), EmptyMutation, EmptySubscription)
        .data(pipeline)
        .finish()
}

#[cfg(test)]
struct TestSchema {
    _dir: tempfile::TempDir, // to prevent the data directory from being deleted while the test is running
    pipeline: Arc<RagPipeline>,
    schema: Schema,
}

#[cfg(test)]
impl TestSchema {
    fn new() -> Self {
        use std::time::Duration;

        use crate::{
            database::Database,
            pipeline::{
                test_support::{
                    bleu_rerank_model, bleu_response_model, transformer_corpus, FakeIndex,
                },
                Collaborators,
            },
            session_log::SessionLog,
            settings::RetrievalSettings,
        };

        let dir = tempfile::tempdir().unwrap();
        let parts = Collaborators {
            index: Arc::new(FakeIndex::new(transformer_corpus())),
            response_model: bleu_response_model(),
            rerank_model: bleu_rerank_model(),
            cache: Database::connect(&dir.path().join("cache")).unwrap(),
            session_log: SessionLog::new(&dir.path().join("logs")),
        };
        let pipeline = Arc::new(RagPipeline::new(
            parts,
            RetrievalSettings::default(),
            Duration::from_secs(5),
        ));
        let schema = schema(Arc::clone(&pipeline));
        Self {
            _dir: dir,
            pipeline,
            schema,
        }
    }

    async fn execute(&self, query: &str) -> async_graphql::Response {
        let request: async_graphql::Request = query.into();
        self.schema.execute(request).await
    }
}
