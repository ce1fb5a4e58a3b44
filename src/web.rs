use std::{convert::Infallible, net::SocketAddr};

use async_graphql::http::GraphiQLSource;
use async_graphql_warp::GraphQLResponse;
use tracing::info;
use warp::Filter;

use crate::api::Schema;

/// Serves the GraphQL API at `/graphql` and GraphiQL at `/`.
pub async fn serve(schema: Schema, addr: SocketAddr) {
    let graphql = warp::path("graphql")
        .and(warp::path::end())
        .and(async_graphql_warp::graphql(schema))
        .and_then(
            |(schema, request): (Schema, async_graphql::Request)| async move {
                Ok::<_, Infallible>(GraphQLResponse::from(schema.execute(request).await))
            },
        );
    let graphiql = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html(GraphiQLSource::build().endpoint("/graphql").finish()));

    info!(%addr, "serving GraphQL");
    warp::serve(graphql.or(graphiql)).run(addr).await;
}
