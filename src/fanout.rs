use std::collections::BTreeMap;
use std::future::Future;

use futures::stream::{self, StreamExt};

pub const DEFAULT_FANOUT_LIMIT: usize = 8;

/// Runs independent sub-queries concurrently, at most `limit` at a time.
///
/// Branches are polled inside the caller's future, so dropping that future
/// drops every branch still in flight. Branch failures are the branch's own
/// concern; the join itself cannot fail.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    limit: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT_LIMIT)
    }
}

impl FanOut {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    #[cfg(test)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Results come back in completion order.
    pub async fn join_all<I, F, T>(&self, branches: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T>,
    {
        stream::iter(branches)
            .buffer_unordered(self.limit)
            .collect()
            .await
    }

    /// Joins keyed branches into a map, so completion order does not matter.
    pub async fn join_keyed<I, F, K, T>(&self, branches: I) -> BTreeMap<K, T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = (K, T)>,
        K: Ord,
    {
        self.join_all(branches).await.into_iter().collect()
    }
}
