use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::base::RawResponse;
use crate::errors::{ErrorKind, ProviderError};

/// Turns a final error into a result, or into a different error
pub type ExceptionHandler =
    Arc<dyn Fn(ProviderError) -> Result<RawResponse, ProviderError> + Send + Sync>;

/// One re-invocable provider call handed to a custom strategy
pub type Operation<'a> =
    Box<dyn FnMut() -> BoxFuture<'a, Result<RawResponse, ProviderError>> + Send + 'a>;

/// How the built-in strategy waits between attempts
pub type Sleeper = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// A caller-supplied retry loop. It owns invocation, retry and backoff entirely.
#[async_trait]
pub trait RetryStrategy: Send + Sync {
    async fn execute<'a>(&self, operation: Operation<'a>) -> Result<RawResponse, ProviderError>;
}

#[derive(Clone)]
pub enum RetryMode {
    /// Run once
    Disabled,
    /// Exponential backoff over the retryable kinds
    Enabled,
    Custom(Arc<dyn RetryStrategy>),
}

/// Error left after the policy gave up, with the number of calls made
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub error: ProviderError,
    pub attempts: u32,
}

/// Retry behaviour around each outbound provider call
#[derive(Clone)]
pub struct RetryPolicy {
    pub mode: RetryMode,
    /// Retries allowed after the first attempt
    pub max_attempts: u32,
    /// Unit of the `2^(n-1)` backoff
    pub base_delay: Duration,
    pub exception_handler: Option<ExceptionHandler>,
    retryable: Vec<ErrorKind>,
    sleeper: Sleeper,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            RetryMode::Disabled => "disabled",
            RetryMode::Enabled => "enabled",
            RetryMode::Custom(_) => "custom",
        };
        f.debug_struct("RetryPolicy")
            .field("mode", &mode)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("retryable", &self.retryable)
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::enabled(3)
    }
}

impl RetryPolicy {
    fn with_mode(mode: RetryMode, max_attempts: u32) -> Self {
        Self {
            mode,
            max_attempts,
            base_delay: Duration::from_secs(1),
            exception_handler: None,
            retryable: ErrorKind::default_retryable(),
            sleeper: Arc::new(|delay| Box::pin(tokio::time::sleep(delay))),
        }
    }

    pub fn disabled() -> Self {
        Self::with_mode(RetryMode::Disabled, 0)
    }

    pub fn enabled(max_attempts: u32) -> Self {
        Self::with_mode(RetryMode::Enabled, max_attempts)
    }

    pub fn custom(strategy: Arc<dyn RetryStrategy>) -> Self {
        Self::with_mode(RetryMode::Custom(strategy), 0)
    }

    /// Add kinds to the retryable set. The defaults are always kept.
    pub fn with_retryable<I: IntoIterator<Item = ErrorKind>>(mut self, kinds: I) -> Self {
        for kind in kinds {
            if !self.retryable.contains(&kind) {
                self.retryable.push(kind);
            }
        }
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn retryable(&self) -> &[ErrorKind] {
        &self.retryable
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `operation` under this policy
    pub async fn run<'a, F, Fut>(&self, mut operation: F) -> Result<RawResponse, RetryFailure>
    where
        F: FnMut() -> Fut + Send + 'a,
        Fut: Future<Output = Result<RawResponse, ProviderError>> + Send + 'a,
    {
        match &self.mode {
            RetryMode::Disabled => match operation().await {
                Ok(response) => Ok(response),
                Err(error) => self.handle(error, 1),
            },
            RetryMode::Enabled => {
                let mut retries = 0u32;
                loop {
                    match operation().await {
                        Ok(response) => return Ok(response),
                        Err(error)
                            if retries < self.max_attempts && self.is_retryable(error.kind()) =>
                        {
                            retries += 1;
                            let delay = self.backoff(retries);
                            warn!(
                                kind = %error.kind(),
                                retry = retries,
                                delay_ms = delay.as_millis() as u64,
                                "provider call failed, retrying: {}",
                                error
                            );
                            (self.sleeper)(delay).await;
                        }
                        Err(error) => return self.handle(error, retries + 1),
                    }
                }
            }
            RetryMode::Custom(strategy) => {
                let boxed: Operation<'a> =
                    Box::new(move || -> BoxFuture<'a, Result<RawResponse, ProviderError>> {
                        Box::pin(operation())
                    });
                match strategy.execute(boxed).await {
                    Ok(response) => Ok(response),
                    Err(error) => self.handle(error, 1),
                }
            }
        }
    }

    fn handle(&self, error: ProviderError, attempts: u32) -> Result<RawResponse, RetryFailure> {
        match &self.exception_handler {
            Some(handler) => {
                debug!(attempts, "delegating provider error to exception handler");
                handler(error).map_err(|error| RetryFailure { error, attempts })
            }
            None => Err(RetryFailure { error, attempts }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn recording_sleeper() -> (Sleeper, Arc<Mutex<Vec<Duration>>>) {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = recorded.clone();
        let sleeper: Sleeper = Arc::new(move |delay| {
            sink.lock().unwrap().push(delay);
            Box::pin(async {})
        });
        (sleeper, recorded)
    }

    fn timeout() -> ProviderError {
        ProviderError::Timeout("timed out".to_string())
    }

    #[tokio::test]
    async fn test_retry_bound_and_last_error() {
        let (sleeper, _) = recording_sleeper();
        let policy = RetryPolicy::enabled(3).with_sleeper(sleeper);
        let calls = AtomicU32::new(0);

        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(ProviderError::Timeout(format!("attempt {}", n))) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(failure.attempts, 4);
        assert_eq!(failure.error.to_string(), "Request timed out: attempt 4");
    }

    #[tokio::test]
    async fn test_backoff_sequence() {
        let (sleeper, recorded) = recording_sleeper();
        let policy = RetryPolicy::enabled(3).with_sleeper(sleeper);

        let _ = policy.run(|| async { Err(timeout()) }).await;

        let delays: Vec<u64> = recorded.lock().unwrap().iter().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_immediately() {
        let (sleeper, recorded) = recording_sleeper();
        let policy = RetryPolicy::enabled(5).with_sleeper(sleeper);
        let calls = AtomicU32::new(0);

        let failure = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Client {
                        status: 400,
                        body: "bad".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.error.kind(), ErrorKind::ClientError);
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let (sleeper, _) = recording_sleeper();
        let policy = RetryPolicy::enabled(2).with_sleeper(sleeper);
        let calls = AtomicU32::new(0);

        let response = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProviderError::from_status(503, "busy".to_string()))
                    } else {
                        Ok(RawResponse::new(json!({"ok": true})))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(response.body["ok"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exception_handler_result_after_exhaustion() {
        let (sleeper, _) = recording_sleeper();
        let policy = RetryPolicy::enabled(2)
            .with_sleeper(sleeper)
            .with_exception_handler(Arc::new(|error| {
                Ok(RawResponse::new(json!({"handled": error.to_string()})))
            }));
        let calls = AtomicU32::new(0);

        let response = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout()) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(response.body["handled"], "Request timed out: timed out");
    }

    #[tokio::test]
    async fn test_disabled_runs_once() {
        let calls = AtomicU32::new(0);
        let failure = RetryPolicy::disabled()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout()) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);

        let handled = RetryPolicy::disabled()
            .with_exception_handler(Arc::new(|_| Ok(RawResponse::new(json!("fallback")))))
            .run(|| async { Err(timeout()) })
            .await
            .unwrap();
        assert_eq!(handled.body, json!("fallback"));
    }

    struct TwiceStrategy {
        seen: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RetryStrategy for TwiceStrategy {
        async fn execute<'a>(
            &self,
            mut operation: Operation<'a>,
        ) -> Result<RawResponse, ProviderError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            match operation().await {
                Ok(response) => Ok(response),
                Err(_) => operation().await,
            }
        }
    }

    #[tokio::test]
    async fn test_custom_strategy_owns_invocation() {
        let seen = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::custom(Arc::new(TwiceStrategy { seen: seen.clone() }))
            .with_exception_handler(Arc::new(|_| Ok(RawResponse::new(json!("handled")))));
        let calls = AtomicU32::new(0);

        let response = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout()) }
            })
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(response.body, json!("handled"));
    }

    #[test]
    fn test_retryable_is_union_with_defaults() {
        let policy = RetryPolicy::enabled(1).with_retryable(Vec::new());
        assert_eq!(policy.retryable(), ErrorKind::default_retryable().as_slice());

        let policy = RetryPolicy::enabled(1).with_retryable([ErrorKind::Decode, ErrorKind::Timeout]);
        assert!(policy.is_retryable(ErrorKind::Decode));
        assert!(policy.is_retryable(ErrorKind::RateLimited));
        assert_eq!(policy.retryable().len(), ErrorKind::default_retryable().len() + 1);
    }
}
