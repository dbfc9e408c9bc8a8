//! # Key-Value Backend
//!
//! The entire card collection lives as one JSON array under [`CARDS_KEY`].
//! New identifiers come from an atomic increment of [`ID_COUNTER_KEY`], so
//! two creates can never mint the same id.
//!
//! Every mutation is a read-modify-write of the whole blob:
//!
//! ```text
//! GET cards ──► decode Vec<Card> ──► apply create/update/delete ──► encode ──► write back
//!     ▲                                                                          │
//!     └──────────────── blob changed since GET (compare-and-swap only) ◄─────────┘
//! ```
//!
//! With [`KvWriteMode::Overwrite`] the write back is a plain `SET`. Two
//! concurrent mutations can then both read the same snapshot and the later
//! write silently discards the earlier one (lost update). Identifiers stay
//! unique even then; only the collection contents are affected.
//!
//! [`KvWriteMode::CompareAndSwap`] holds a store-wide write lock across the
//! whole cycle, so writers in this process never race each other. The write
//! back only lands if the blob still holds the exact snapshot that was read;
//! a miss means another process wrote in between, and the cycle re-runs on a
//! fresh read after a jittered backoff, at most [`MAX_CAS_ATTEMPTS`] times.

mod memory;
mod redis_client;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use shared::{Card, NewCard};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CardStore, StorageError, StorageResult};
use crate::config::KvWriteMode;

pub use memory::MemoryClient;
pub use redis_client::RedisClient;

/// Key holding the JSON array of every card
pub const CARDS_KEY: &str = "cards";

/// Key holding the identifier counter
pub const ID_COUNTER_KEY: &str = "card_id_counter";

/// Upper bound on re-reads when the collection keeps changing under us
pub const MAX_CAS_ATTEMPTS: u32 = 16;

/// First backoff window after a lost compare-and-swap; doubles per attempt
const CAS_BACKOFF_BASE: Duration = Duration::from_millis(2);

/// Cap on a single backoff window
const CAS_BACKOFF_MAX: Duration = Duration::from_millis(200);

const BACKEND: &str = "keyvalue";

/// Minimal string key-value operations the card store needs
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    /// Round-trip to the server to prove the session works
    async fn ping(&self) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Unconditional write with no expiration
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Write only if the key is absent; returns whether the value was written
    async fn set_if_absent(&self, key: &str, value: &str) -> StorageResult<bool>;

    /// Atomically add one to the integer at `key` (absent counts as 0)
    async fn incr(&self, key: &str) -> StorageResult<i64>;

    /// Atomically write `value` if the key currently holds `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StorageResult<bool>;
}

/// Card store keeping the whole collection in a single key-value blob
pub struct KvCardStore {
    client: Arc<dyn KeyValueClient>,
    write_mode: KvWriteMode,
    /// Serializes read-modify-write cycles issued through this store
    write_lock: Mutex<()>,
}

impl KvCardStore {
    pub fn new(client: Arc<dyn KeyValueClient>, write_mode: KvWriteMode) -> Self {
        Self {
            client,
            write_mode,
            write_lock: Mutex::new(()),
        }
    }

    /// Connect to `redis://` / `rediss://` servers, or use an in-process map for `memory://`
    pub async fn open(url: &str, write_mode: KvWriteMode) -> StorageResult<Self> {
        let client: Arc<dyn KeyValueClient> = if url.starts_with("memory://") {
            info!("Using in-process key-value store");
            Arc::new(MemoryClient::new())
        } else if url.starts_with("redis://") || url.starts_with("rediss://") {
            Arc::new(RedisClient::connect(url).await?)
        } else {
            return Err(StorageError::UnsupportedUrl(url.to_string()));
        };

        // Bad credentials only show up on the first command
        client
            .ping()
            .await
            .map_err(|e| StorageError::connection(BACKEND, e))?;
        info!("Key-value card store ready (write mode: {:?})", write_mode);
        Ok(Self::new(client, write_mode))
    }

    fn decode(raw: Option<&str>) -> StorageResult<Vec<Card>> {
        match raw {
            None => Ok(Vec::new()),
            Some(text) if text.trim().is_empty() => Ok(Vec::new()),
            // A stored `null` is an empty collection too
            Some(text) => Ok(serde_json::from_str::<Option<Vec<Card>>>(text)?.unwrap_or_default()),
        }
    }

    async fn load(&self) -> StorageResult<(Option<String>, Vec<Card>)> {
        let raw = self.client.get(CARDS_KEY).await?;
        let cards = Self::decode(raw.as_deref())?;
        Ok((raw, cards))
    }

    /// Random delay in `[0, window]`, where the window doubles with every
    /// lost attempt up to [`CAS_BACKOFF_MAX`]
    fn backoff(attempt: u32) -> Duration {
        let window = CAS_BACKOFF_BASE
            .saturating_mul(1 << attempt.min(16))
            .min(CAS_BACKOFF_MAX);
        let millis = rand::thread_rng().gen_range(0..=window.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Run one read-modify-write cycle. `apply` returns `None` when it left
    /// the collection untouched, in which case nothing is written.
    async fn mutate<T, F>(&self, mut apply: F) -> StorageResult<Option<T>>
    where
        T: Send,
        F: FnMut(&mut Vec<Card>) -> Option<T> + Send,
    {
        // Overwrite mode keeps the unguarded cycle, lost updates included
        let _guard = match self.write_mode {
            KvWriteMode::CompareAndSwap => Some(self.write_lock.lock().await),
            KvWriteMode::Overwrite => None,
        };

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let (snapshot, mut cards) = self.load().await?;

            let outcome = match apply(&mut cards) {
                Some(outcome) => outcome,
                None => return Ok(None),
            };
            let encoded = serde_json::to_string(&cards)?;

            match self.write_mode {
                KvWriteMode::Overwrite => {
                    self.client.set(CARDS_KEY, &encoded).await?;
                    return Ok(Some(outcome));
                }
                KvWriteMode::CompareAndSwap => {
                    if self
                        .client
                        .compare_and_swap(CARDS_KEY, snapshot.as_deref(), &encoded)
                        .await?
                    {
                        return Ok(Some(outcome));
                    }
                    debug!("Card collection changed during attempt {}, re-reading", attempt);
                    if attempt < MAX_CAS_ATTEMPTS {
                        tokio::time::sleep(Self::backoff(attempt)).await;
                    }
                }
            }
        }

        warn!(
            "Giving up on card collection write after {} attempts",
            MAX_CAS_ATTEMPTS
        );
        Err(StorageError::Conflict {
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}

#[async_trait]
impl CardStore for KvCardStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        if self.client.set_if_absent(CARDS_KEY, "[]").await? {
            info!("Seeded empty card collection at key {}", CARDS_KEY);
        }
        Ok(())
    }

    async fn create(&self, card: NewCard) -> StorageResult<Card> {
        // Minted once, outside the cycle, so a re-read never burns another id
        let id = self.client.incr(ID_COUNTER_KEY).await?;
        let card = card.with_id(id);

        self.mutate(|cards| {
            cards.push(card.clone());
            Some(())
        })
        .await?;

        Ok(card)
    }

    async fn read_all(&self) -> StorageResult<Vec<Card>> {
        let (_, cards) = self.load().await?;
        Ok(cards)
    }

    async fn update(&self, card: &Card) -> StorageResult<()> {
        let replaced = self
            .mutate(|cards| {
                let slot = cards.iter_mut().find(|existing| existing.id == card.id)?;
                *slot = card.clone();
                Some(())
            })
            .await?;

        if replaced.is_none() {
            debug!("Update of card {} matched nothing", card.id);
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> StorageResult<()> {
        let removed = self
            .mutate(|cards| {
                let index = cards.iter().position(|existing| existing.id == id)?;
                Some(cards.remove(index))
            })
            .await?;

        if removed.is_none() {
            debug!("Delete of card {} matched nothing", id);
        }
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        // Sessions are dropped with the client
        debug!("Closing key-value card store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn setup_test(write_mode: KvWriteMode) -> (Arc<MemoryClient>, KvCardStore) {
        let client = Arc::new(MemoryClient::new());
        let store = KvCardStore::new(client.clone(), write_mode);
        (client, store)
    }

    fn card_named(name: &str) -> NewCard {
        NewCard {
            name: name.to_string(),
            level: 4,
            attribute: "Earth".to_string(),
            race: "Warrior".to_string(),
            attack: 1800,
            defense: 1200,
            effect: String::new(),
        }
    }

    #[tokio::test]
    async fn test_absent_collection_reads_empty() {
        let (_, store) = setup_test(KvWriteMode::CompareAndSwap);
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_and_blank_blobs_read_empty() {
        let (client, store) = setup_test(KvWriteMode::CompareAndSwap);

        client.set(CARDS_KEY, "null").await.unwrap();
        assert!(store.read_all().await.unwrap().is_empty());

        client.set(CARDS_KEY, "").await.unwrap();
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_serialization_error() {
        let (client, store) = setup_test(KvWriteMode::CompareAndSwap);
        client.set(CARDS_KEY, "{not json").await.unwrap();

        assert!(matches!(
            store.read_all().await,
            Err(StorageError::Serialization(_))
        ));
        assert!(matches!(
            store.create(card_named("Dragon")).await,
            Err(StorageError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_schema_seeds_only_when_absent() {
        let (client, store) = setup_test(KvWriteMode::CompareAndSwap);

        store.ensure_schema().await.unwrap();
        assert_eq!(client.get(CARDS_KEY).await.unwrap().as_deref(), Some("[]"));

        let created = store.create(card_named("Dragon")).await.unwrap();
        store.ensure_schema().await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), vec![created]);
    }

    #[tokio::test]
    async fn test_sequential_creates_have_increasing_ids() {
        let (client, store) = setup_test(KvWriteMode::CompareAndSwap);

        let mut previous = 0;
        for i in 0..5 {
            let card = store.create(card_named(&format!("Card {}", i))).await.unwrap();
            assert!(card.id > previous, "ids must strictly increase");
            previous = card.id;
        }

        let cards = store.read_all().await.unwrap();
        assert_eq!(cards.len(), 5);
        // Collection keeps insertion order
        assert_eq!(cards[0].name, "Card 0");
        assert_eq!(cards[4].name, "Card 4");
        assert_eq!(client.get(ID_COUNTER_KEY).await.unwrap().as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_create_ignores_existing_ids_and_continues_counter() {
        let (client, store) = setup_test(KvWriteMode::CompareAndSwap);
        client.set(ID_COUNTER_KEY, "41").await.unwrap();

        let card = store.create(card_named("Dragon")).await.unwrap();
        assert_eq!(card.id, 42);
    }

    #[tokio::test]
    async fn test_update_replaces_matching_card() {
        let (_, store) = setup_test(KvWriteMode::CompareAndSwap);
        let first = store.create(card_named("Dragon")).await.unwrap();
        let second = store.create(card_named("Magician")).await.unwrap();

        let mut updated = first.clone();
        updated.attack = 3500;
        store.update(&updated).await.unwrap();

        assert_eq!(store.read_all().await.unwrap(), vec![updated, second]);
    }

    #[tokio::test]
    async fn test_update_missing_id_leaves_blob_untouched() {
        let (client, store) = setup_test(KvWriteMode::CompareAndSwap);
        store.create(card_named("Dragon")).await.unwrap();
        let before = client.get(CARDS_KEY).await.unwrap();

        let ghost = card_named("Ghost").with_id(999);
        store.update(&ghost).await.expect("no-match update should succeed");

        assert_eq!(client.get(CARDS_KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_removes_first_match_only() {
        let (_, store) = setup_test(KvWriteMode::CompareAndSwap);
        let first = store.create(card_named("Dragon")).await.unwrap();
        let second = store.create(card_named("Magician")).await.unwrap();

        store.delete(first.id).await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), vec![second.clone()]);

        store.delete(first.id).await.expect("no-match delete should succeed");
        assert_eq!(store.read_all().await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn test_delete_on_absent_collection_writes_nothing() {
        let (client, store) = setup_test(KvWriteMode::Overwrite);
        store.delete(1).await.unwrap();
        assert!(client.get(CARDS_KEY).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_creates_are_not_lost_with_compare_and_swap() {
        let client = Arc::new(MemoryClient::new());
        let store = Arc::new(KvCardStore::new(client.clone(), KvWriteMode::CompareAndSwap));
        store.ensure_schema().await.unwrap();

        const WRITERS: usize = 200;
        let mut handles = Vec::new();
        for i in 0..WRITERS {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(card_named(&format!("Card {}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().expect("create should not conflict out");
        }

        let cards = store.read_all().await.unwrap();
        assert_eq!(cards.len(), WRITERS);
        let ids: HashSet<i64> = cards.iter().map(|card| card.id).collect();
        assert_eq!(ids.len(), WRITERS);
        // No create burned an id on a failed write
        assert_eq!(
            client.get(ID_COUNTER_KEY).await.unwrap(),
            Some(WRITERS.to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_mixed_concurrent_writes_with_compare_and_swap() {
        let client = Arc::new(MemoryClient::new());
        let store = Arc::new(KvCardStore::new(client.clone(), KvWriteMode::CompareAndSwap));
        let seeded = store.create(card_named("Seed")).await.unwrap();

        const WRITERS: usize = 100;
        let mut handles = Vec::new();
        for i in 0..WRITERS {
            let store = store.clone();
            let seeded = seeded.clone();
            handles.push(tokio::spawn(async move {
                store.create(card_named(&format!("Card {}", i))).await?;
                let mut updated = seeded;
                updated.attack = i as i64;
                store.update(&updated).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().expect("write should not conflict out");
        }

        assert_eq!(store.read_all().await.unwrap().len(), WRITERS + 1);
    }

    /// Client that loses the first few compare-and-swaps, as if a writer in
    /// another process got there first.
    struct RacedFor {
        inner: MemoryClient,
        losses: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl KeyValueClient for RacedFor {
        async fn ping(&self) -> StorageResult<()> {
            self.inner.ping().await
        }

        async fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.inner.set(key, value).await
        }

        async fn set_if_absent(&self, key: &str, value: &str) -> StorageResult<bool> {
            self.inner.set_if_absent(key, value).await
        }

        async fn incr(&self, key: &str) -> StorageResult<i64> {
            self.inner.incr(key).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<&str>,
            value: &str,
        ) -> StorageResult<bool> {
            use std::sync::atomic::Ordering;
            let remaining = self.losses.load(Ordering::SeqCst);
            if remaining > 0 {
                self.losses.store(remaining - 1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.compare_and_swap(key, expected, value).await
        }
    }

    #[tokio::test]
    async fn test_lost_compare_and_swap_retries_after_backoff() {
        let store = KvCardStore::new(
            Arc::new(RacedFor {
                inner: MemoryClient::new(),
                losses: std::sync::atomic::AtomicU32::new(3),
            }),
            KvWriteMode::CompareAndSwap,
        );

        let created = store.create(card_named("Dragon")).await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), vec![created]);
    }

    #[test]
    fn test_backoff_window_is_capped() {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            assert!(KvCardStore::backoff(attempt) <= CAS_BACKOFF_MAX);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_with_overwrite_may_lose_updates() {
        let client = Arc::new(MemoryClient::new());
        let store = Arc::new(KvCardStore::new(client.clone(), KvWriteMode::Overwrite));
        store.ensure_schema().await.unwrap();

        const WRITERS: usize = 32;
        let mut handles = Vec::new();
        for i in 0..WRITERS {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(card_named(&format!("Card {}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().expect("overwrite never conflicts");
        }

        // Lost updates can shrink the collection, but ids are never duplicated
        // and every create consumed exactly one counter value.
        let cards = store.read_all().await.unwrap();
        assert!(!cards.is_empty());
        assert!(cards.len() <= WRITERS);
        let ids: HashSet<i64> = cards.iter().map(|card| card.id).collect();
        assert_eq!(ids.len(), cards.len());
        assert_eq!(
            client.get(ID_COUNTER_KEY).await.unwrap(),
            Some(WRITERS.to_string())
        );
    }

    /// Client whose compare-and-swap always loses, as if another writer
    /// raced every attempt.
    struct AlwaysRacing(MemoryClient);

    #[async_trait]
    impl KeyValueClient for AlwaysRacing {
        async fn ping(&self) -> StorageResult<()> {
            self.0.ping().await
        }

        async fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.0.set(key, value).await
        }

        async fn set_if_absent(&self, key: &str, value: &str) -> StorageResult<bool> {
            self.0.set_if_absent(key, value).await
        }

        async fn incr(&self, key: &str) -> StorageResult<i64> {
            self.0.incr(key).await
        }

        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&str>,
            _value: &str,
        ) -> StorageResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_persistent_contention_reports_conflict() {
        let store = KvCardStore::new(
            Arc::new(AlwaysRacing(MemoryClient::new())),
            KvWriteMode::CompareAndSwap,
        );

        match store.create(card_named("Dragon")).await {
            Err(StorageError::Conflict { attempts }) => assert_eq!(attempts, MAX_CAS_ATTEMPTS),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        assert!(matches!(
            KvCardStore::open("memcached://localhost", KvWriteMode::Overwrite).await,
            Err(StorageError::UnsupportedUrl(_))
        ));
    }
}
