//! Rate-limited, retrying access to the remote store.

use sheetsync_engine::Position;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use crate::limiter::TokenBucket;
use crate::remote::{Cells, RemoteError, RemoteStore, WriteConfirmation};
use crate::retry::{Failure, RetryPolicy};

/// The outcome of a confirmed remote write, with the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed<T> {
    pub value: T,
    pub attempts: u32,
}

/// Wraps a [`RemoteStore`] with a token bucket and a retry policy.
///
/// Every attempt, retries included, takes a token from the bucket first.
/// Transient failures are retried; permanent ones propagate immediately.
pub struct RateLimitedClient {
    store: Arc<dyn RemoteStore>,
    limiter: Option<TokenBucket>,
    retry: RetryPolicy,
}

impl RateLimitedClient {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        limiter: Option<TokenBucket>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            limiter,
            retry,
        }
    }

    pub fn from_config(store: Arc<dyn RemoteStore>, config: &EngineConfig) -> Self {
        Self::new(
            store,
            TokenBucket::from_config(&config.quota),
            RetryPolicy::from_config(&config.retry),
        )
    }

    async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<Confirmed<T>>
    where
        F: Fn(Arc<dyn RemoteStore>) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, RemoteError>>,
    {
        let result = self
            .retry
            .run(operation, || {
                let store = Arc::clone(&self.store);
                let fut = f(store);
                async move {
                    if let Some(limiter) = &self.limiter {
                        limiter.acquire().await;
                    }
                    fut.await
                }
            })
            .await;

        match result {
            Ok((value, attempts)) => Ok(Confirmed { value, attempts }),
            Err(Failure {
                error,
                attempts,
                exhausted: true,
            }) => Err(SyncError::RemoteUnavailable {
                attempts,
                last_error: error.to_string(),
            }),
            Err(Failure { error, .. }) => Err(SyncError::from(error)),
        }
    }

    /// Every row of a sheet, header included.
    pub async fn read(&self, sheet: &str) -> Result<Vec<Cells>> {
        let sheet = sheet.to_string();
        self.call("read", |store| {
            let sheet = sheet.clone();
            async move { store.read(&sheet).await }
        })
        .await
        .map(|c| c.value)
    }

    /// Rows `first..=last` of a sheet.
    pub async fn read_rows(
        &self,
        sheet: &str,
        first: Position,
        last: Position,
    ) -> Result<Vec<Cells>> {
        let sheet = sheet.to_string();
        self.call("read_rows", |store| {
            let sheet = sheet.clone();
            async move { store.read_rows(&sheet, first, last).await }
        })
        .await
        .map(|c| c.value)
    }

    pub async fn write(
        &self,
        sheet: &str,
        start_row: Position,
        rows: Vec<Cells>,
    ) -> Result<Confirmed<WriteConfirmation>> {
        let sheet = sheet.to_string();
        self.call("write", |store| {
            let sheet = sheet.clone();
            let rows = rows.clone();
            async move { store.write(&sheet, start_row, rows).await }
        })
        .await
    }

    /// Append a row. The confirmed value is the row's position.
    pub async fn append(&self, sheet: &str, row: Cells) -> Result<Confirmed<Position>> {
        let sheet = sheet.to_string();
        self.call("append", |store| {
            let sheet = sheet.clone();
            let row = row.clone();
            async move { store.append(&sheet, row).await }
        })
        .await
    }

    pub async fn delete_row(&self, sheet: &str, row: Position) -> Result<Confirmed<()>> {
        let sheet = sheet.to_string();
        self.call("delete_row", |store| {
            let sheet = sheet.clone();
            async move { store.delete_row(&sheet, row).await }
        })
        .await
    }

    /// Create a sheet if it is missing. Returns true if it was created.
    pub async fn ensure_sheet(&self, sheet: &str) -> Result<bool> {
        let sheet = sheet.to_string();
        self.call("ensure_sheet", |store| {
            let sheet = sheet.clone();
            async move { store.ensure_sheet(&sheet).await }
        })
        .await
        .map(|c| c.value)
    }

    /// Check the spreadsheet is reachable. Returns its sheet titles.
    pub async fn health(&self) -> Result<Vec<String>> {
        self.call("health", |store| async move { store.sheet_titles().await })
            .await
            .map(|c| c.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemorySheets, Op};

    fn client(store: Arc<MemorySheets>, attempts: u32) -> RateLimitedClient {
        RateLimitedClient::new(store, None, RetryPolicy::immediate(attempts))
    }

    fn store() -> Arc<MemorySheets> {
        Arc::new(MemorySheets::new().with_sheet("People", vec![vec!["id", "name"]]))
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = store();
        store.fail_next(2, RemoteError::Timeout);

        let confirmed = client(store.clone(), 5)
            .append("People", vec!["1".into(), "A".into()])
            .await
            .unwrap();

        assert_eq!(confirmed.value, 2);
        assert_eq!(confirmed.attempts, 3);
        assert_eq!(store.calls(Op::Append), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_remote_unavailable() {
        let store = store();
        store.fail_next(10, RemoteError::RateLimited { retry_after: None });

        let err = client(store.clone(), 3).read("People").await.unwrap_err();

        assert!(matches!(err, SyncError::RemoteUnavailable { attempts: 3, .. }));
        assert_eq!(store.calls(Op::Read), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let store = store();
        store.push_fault(RemoteError::PermissionDenied("read-only".into()));

        let err = client(store.clone(), 5)
            .write("People", 2, vec![vec!["1".into(), "A".into()]])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "permission_denied");
        assert_eq!(store.calls(Op::Write), 1);
    }

    #[tokio::test]
    async fn every_attempt_takes_a_token() {
        let store = store();
        store.fail_next(1, RemoteError::Timeout);
        let bucket = TokenBucket::new(2, 0.001);
        let client = RateLimitedClient::new(store.clone(), Some(bucket), RetryPolicy::immediate(3));

        client.read("People").await.unwrap();

        let limiter = client.limiter.as_ref().unwrap();
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn health_lists_sheets() {
        let titles = client(store(), 1).health().await.unwrap();
        assert_eq!(titles, vec!["People".to_string()]);
    }
}
