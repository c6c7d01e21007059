//! Rate-limited, retrying wrapper around a [`RemoteStore`].
//!
//! Every call goes through one shared [`RateLimiter`] and one
//! [`RetryPolicy`], so running sibling subtrees concurrently never raises
//! the request rate the remote sees.

use async_trait::async_trait;
use tracing::debug;

use crate::contract::{DatasetRef, RemoteChild, RemoteDataset, RemoteRef, RemoteRow, RemoteStore};
use crate::error::RemoteError;
use crate::node::{Block, Row, Schema};
use crate::retry::RetryPolicy;
use crate::throttle::RateLimiter;

pub struct RemoteClient<S> {
    inner: S,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl<S: RemoteStore> RemoteClient<S> {
    pub fn new(inner: S, limiter: RateLimiter, policy: RetryPolicy) -> Self {
        RemoteClient {
            inner,
            limiter,
            policy,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, RemoteError>
    where
        F: Fn() -> Fut + Sync,
        Fut: std::future::Future<Output = Result<T, RemoteError>> + Send,
        T: Send,
    {
        let op = &op;
        self.policy
            .run(operation, move || async move {
                self.limiter.acquire().await;
                debug!(operation, "[REMOTE] call");
                op().await
            })
            .await
    }
}

#[async_trait]
impl<S: RemoteStore> RemoteStore for RemoteClient<S> {
    async fn find_children(
        &self,
        parent: &RemoteRef,
        title: &str,
    ) -> Result<Vec<RemoteChild>, RemoteError> {
        self.call("find_children", move || self.inner.find_children(parent, title))
            .await
    }

    async fn create_container(
        &self,
        parent: &RemoteRef,
        title: &str,
    ) -> Result<RemoteRef, RemoteError> {
        self.call("create_container", move || self.inner.create_container(parent, title))
            .await
    }

    async fn create_document(
        &self,
        parent: &RemoteRef,
        title: &str,
        body: &[Block],
    ) -> Result<RemoteRef, RemoteError> {
        self.call("create_document", move || {
            self.inner.create_document(parent, title, body)
        })
        .await
    }

    async fn overwrite_document(&self, id: &RemoteRef, body: &[Block]) -> Result<(), RemoteError> {
        self.call("overwrite_document", move || self.inner.overwrite_document(id, body))
            .await
    }

    async fn append_body(&self, id: &RemoteRef, body: &[Block]) -> Result<(), RemoteError> {
        self.call("append_body", move || self.inner.append_body(id, body))
            .await
    }

    async fn archive(&self, id: &RemoteRef) -> Result<(), RemoteError> {
        self.call("archive", move || self.inner.archive(id)).await
    }

    async fn create_dataset(
        &self,
        parent: &RemoteRef,
        title: &str,
        schema: &Schema,
    ) -> Result<DatasetRef, RemoteError> {
        self.call("create_dataset", move || {
            self.inner.create_dataset(parent, title, schema)
        })
        .await
    }

    async fn overwrite_dataset(
        &self,
        dataset: &DatasetRef,
        title: &str,
        schema: &Schema,
    ) -> Result<(), RemoteError> {
        self.call("overwrite_dataset", move || {
            self.inner.overwrite_dataset(dataset, title, schema)
        })
        .await
    }

    async fn retrieve_dataset(&self, id: &RemoteRef) -> Result<RemoteDataset, RemoteError> {
        self.call("retrieve_dataset", move || self.inner.retrieve_dataset(id))
            .await
    }

    async fn query_rows(&self, dataset: &DatasetRef) -> Result<Vec<RemoteRow>, RemoteError> {
        self.call("query_rows", move || self.inner.query_rows(dataset))
            .await
    }

    async fn create_row(
        &self,
        dataset: &DatasetRef,
        schema: &Schema,
        row: &Row,
    ) -> Result<RemoteRef, RemoteError> {
        self.call("create_row", move || self.inner.create_row(dataset, schema, row))
            .await
    }

    async fn overwrite_row(
        &self,
        id: &RemoteRef,
        schema: &Schema,
        row: &Row,
    ) -> Result<(), RemoteError> {
        self.call("overwrite_row", move || self.inner.overwrite_row(id, schema, row))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockRemoteStore;
    use crate::retry::default_classify;
    use mockall::Sequence;
    use std::time::Duration;

    fn client(mock: MockRemoteStore) -> RemoteClient<MockRemoteStore> {
        RemoteClient::new(
            mock,
            RateLimiter::new(Duration::from_millis(350)),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                max_total_wait: Duration::from_secs(5),
                jitter: false,
                classify: default_classify,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limited_create_then_succeeds() {
        let mut mock = MockRemoteStore::new();
        let mut seq = Sequence::new();
        mock.expect_create_container()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(RemoteError::RateLimited { retry_after: None }));
        mock.expect_create_container()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(RemoteRef::from("page-1")));

        let client = client(mock);
        let id = client
            .create_container(&RemoteRef::from("root"), "Story")
            .await
            .unwrap();
        assert_eq!(id, RemoteRef::from("page-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn archived_error_passes_through_without_retry() {
        let mut mock = MockRemoteStore::new();
        mock.expect_append_body()
            .times(1)
            .returning(|_, _| Err(RemoteError::ArchivedAncestor("parent archived".into())));

        let err = client(mock)
            .append_body(&RemoteRef::from("p"), &[Block::text("x")])
            .await
            .unwrap_err();
        assert!(err.is_archived());
    }

    #[tokio::test(start_paused = true)]
    async fn calls_are_throttled() {
        let mut mock = MockRemoteStore::new();
        mock.expect_archive().times(3).returning(|_| Ok(()));
        let client = client(mock);
        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            client.archive(&RemoteRef::from("p")).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }
}
