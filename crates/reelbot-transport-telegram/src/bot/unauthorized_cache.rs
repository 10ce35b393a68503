//! Unauthorized access flood protection
//!
//! Chats that are not on the allow-list get the "Access Denied" reply once
//! per cooldown period. Further attempts are only counted, so a noisy group
//! cannot get the bot rate limited by Telegram.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Last "Access Denied" reply per chat
#[derive(Clone)]
pub struct UnauthorizedCache {
    /// chat_id -> time of the last reply; entries expire after the TTL
    cache: Cache<i64, Instant>,
    cooldown: Duration,
    silenced_count: Arc<AtomicU64>,
}

impl UnauthorizedCache {
    /// Creates a new `UnauthorizedCache`
    ///
    /// ```
    /// use reelbot_transport_telegram::bot::UnauthorizedCache;
    ///
    /// let cache = UnauthorizedCache::new(
    ///     1200,   // 20 minutes cooldown
    ///     7200,   // 2 hours TTL
    ///     10_000  // max 10k entries
    /// );
    /// assert_eq!(cache.cooldown().as_secs(), 1200);
    /// ```
    #[must_use]
    pub fn new(cooldown_secs: u64, ttl_secs: u64, max_capacity: u64) -> Self {
        let cooldown = Duration::from_secs(cooldown_secs);
        // An entry must outlive its cooldown or the cooldown is cut short
        let ttl = Duration::from_secs(ttl_secs).max(cooldown);
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            cooldown,
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the chat should get an "Access Denied" reply now.
    ///
    /// Only every 100th silenced attempt is logged.
    pub async fn should_send(&self, chat_id: i64, username: &str) -> bool {
        let in_cooldown = self
            .cache
            .get(&chat_id)
            .await
            .is_some_and(|sent| sent.elapsed() < self.cooldown);
        if !in_cooldown {
            return true;
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 0 {
            debug!(
                "⛔️ Silenced {} unauthorized attempts (recent: chat {} - {})",
                count, chat_id, username
            );
        }
        false
    }

    /// Start the cooldown of `chat_id` after a successful reply
    pub async fn mark_sent(&self, chat_id: i64) {
        self.cache.insert(chat_id, Instant::now()).await;
    }

    /// Returns the current number of entries in the cache
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Returns the total number of silenced unauthorized attempts
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }

    /// Returns the configured cooldown duration
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
