use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::TokenError;
use crate::types::{AccessToken, TokenKey};

type FetchResult = Result<AccessToken, TokenError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// State of one key: the last token and the fetch in flight, if any.
#[derive(Default)]
struct TokenSlot {
    current: ArcSwapOption<AccessToken>,
    inflight: Mutex<Option<SharedFetch>>,
}

impl TokenSlot {
    fn valid(&self, now: Instant) -> Option<Arc<AccessToken>> {
        self.current
            .load_full()
            .filter(|token| !token.is_expired_at(now))
    }
}

/// In-memory token store shared by every provider of a process.
///
/// Reads of a valid token are lock-free. A missing or expired token is
/// fetched at most once per key at a time: concurrent callers join the
/// fetch in flight and all observe its outcome. The fetch runs on its own
/// task, so a caller giving up does not abort it for the others.
#[derive(Default)]
pub struct TokenCache {
    slots: DashMap<TokenKey, Arc<TokenSlot>>,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("keys", &self.slots.len())
            .finish()
    }
}

impl TokenCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &TokenKey) -> Arc<TokenSlot> {
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    /// Cached token for `key`, if it is still valid.
    #[must_use]
    pub fn get(&self, key: &TokenKey) -> Option<AccessToken> {
        let slot = self.slots.get(key)?;
        slot.valid(Instant::now()).map(|token| (*token).clone())
    }

    /// Drop the cached token of `key`, including its refresh token.
    pub fn clear(&self, key: &TokenKey) {
        if let Some(slot) = self.slots.get(key) {
            slot.current.store(None);
            tracing::debug!(key = %key, "token cleared");
        }
    }

    /// Valid token for `key`, running `fetch` when there is none.
    ///
    /// `fetch` receives the previous (expired) token, if any, as the source
    /// of a refresh token. It is only called when no fetch for `key` is in
    /// flight.
    pub(crate) async fn get_or_fetch<F>(
        &self,
        key: &TokenKey,
        cancellation: &CancellationToken,
        fetch: F,
    ) -> FetchResult
    where
        F: FnOnce(Option<Arc<AccessToken>>) -> BoxFuture<'static, FetchResult>,
    {
        let slot = self.slot(key);
        if let Some(token) = slot.valid(Instant::now()) {
            tracing::trace!(key = %key, "token cache hit");
            return Ok((*token).clone());
        }

        let shared = {
            let mut inflight = slot.inflight.lock();
            // another caller may have completed a fetch meanwhile
            if let Some(token) = slot.valid(Instant::now()) {
                return Ok((*token).clone());
            }
            if let Some(shared) = inflight.as_ref() {
                tracing::debug!(key = %key, "joining token fetch in flight");
                shared.clone()
            } else {
                tracing::debug!(key = %key, "starting token fetch");
                let shared = spawn_fetch(Arc::clone(&slot), fetch(slot.current.load_full()));
                *inflight = Some(shared.clone());
                shared
            }
        };

        tokio::select! {
            () = cancellation.cancelled() => Err(TokenError::Cancelled),
            result = shared => result,
        }
    }
}

fn spawn_fetch(slot: Arc<TokenSlot>, fetch: BoxFuture<'static, FetchResult>) -> SharedFetch {
    let handle = tokio::spawn(async move {
        let result = fetch.await;
        // on failure the expired token stays as the refresh token source
        if let Ok(token) = &result {
            slot.current.store(Some(Arc::new(token.clone())));
        }
        slot.inflight.lock().take();
        result
    }
    .in_current_span());

    async move {
        handle
            .await
            .unwrap_or_else(|e| Err(TokenError::http(e)))
    }
    .boxed()
    .shared()
}
