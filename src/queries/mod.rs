//! Read-only queries over orders and stock.

pub mod inventory_queries;
pub mod order_queries;

use async_trait::async_trait;

use crate::{
    db::{
        retry::{with_retry, RetryConfig, StoreRetryPolicy},
        DbPool,
    },
    errors::ServiceError,
};

/// Trait representing a generic asynchronous query.
#[async_trait]
pub trait Query: Send + Sync {
    type Result: Send + Sync;

    /// Executes the query using the provided database connection
    async fn execute(&self, db: &DbPool) -> Result<Self::Result, ServiceError>;
}

/// Executes a query, retrying connection-level store failures. Queries
/// never write, so repeating one is always safe.
pub async fn execute_with_retry<Q: Query>(
    query: &Q,
    db: &DbPool,
    retry: &RetryConfig,
) -> Result<Q::Result, ServiceError> {
    with_retry(retry, StoreRetryPolicy, || query.execute(db)).await
}
