/// Loot valuation.
///
/// `PriceCache` is read from the engine on every kill and every render, so a
/// read never blocks: a miss returns "unknown" and queues one fetch for the
/// item. `run_fetcher` drains that queue on the tokio runtime, calls the
/// (possibly slow) `PriceSource` on the blocking pool, and writes results
/// back. The check-and-enqueue step and the write-back both happen under the
/// one cache lock, and the lock is never held across a source call.
use anyhow::anyhow;
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc;

pub const MAX_CACHE_ENTRIES: usize = 1_000;
pub const PRICE_TTL_MS:      i64   = 24 * 60 * 60 * 1_000;
pub const TOTAL_TTL_MS:      i64   = 24 * 60 * 60 * 1_000;

/// Items that count as a unique drop.
pub const UNIQUE_DROPS: [u32; 9] = [29790, 29792, 29794, 29799, 29788, 29786, 29781, 29836, 29838];

/// Sum quantities per item across several loot maps.
pub fn merge_loot<'a>(maps: impl IntoIterator<Item = &'a BTreeMap<u32, u64>>) -> BTreeMap<u32, u64> {
    let mut merged = BTreeMap::new();
    for map in maps {
        for (&id, &qty) in map {
            *merged.entry(id).or_insert(0) += qty;
        }
    }
    merged
}

pub fn has_uniques(loot: &BTreeMap<u32, u64>) -> bool {
    loot.keys().any(|id| UNIQUE_DROPS.contains(id))
}

// ---------------------------------------------------------------------------
// Price sources and rules
// ---------------------------------------------------------------------------

/// The external item price and name oracle. Calls may be slow or fail.
pub trait PriceSource: Send + Sync {
    fn price(&self, item_id: u32) -> anyhow::Result<i64>;
    fn name(&self, item_id: u32) -> anyhow::Result<String>;
}

/// A price-resolution strategy that overrides the direct lookup for some
/// items.
pub trait PriceRule: Send + Sync {
    fn applies_to(&self, item_id: u32) -> bool;
    fn resolve(&self, item_id: u32, source: &dyn PriceSource) -> anyhow::Result<i64>;
}

/// Price an item from another item's market price, divided by `divisor`,
/// with a fixed `fallback` when that price is not positive.
#[derive(Debug, Clone)]
pub struct DerivedPrice {
    pub items:     Vec<u32>,
    pub base_item: u32,
    pub divisor:   i64,
    pub fallback:  i64,
}

impl PriceRule for DerivedPrice {
    fn applies_to(&self, item_id: u32) -> bool {
        self.items.contains(&item_id)
    }

    fn resolve(&self, _item_id: u32, source: &dyn PriceSource) -> anyhow::Result<i64> {
        let base = source.price(self.base_item)?;
        Ok(if base > 0 { base / self.divisor.max(1) } else { self.fallback })
    }
}

/// Halberd pieces are a third of the assembled halberd; the rancour shard is
/// worth the amulet it makes.
pub fn default_rules() -> Vec<Box<dyn PriceRule>> {
    vec![
        Box::new(DerivedPrice { items: vec![29790, 29792, 29794], base_item: 29796, divisor: 3, fallback: 12_000_000 }),
        Box::new(DerivedPrice { items: vec![29799], base_item: 29801, divisor: 1, fallback: 60_000_000 }),
    ]
}

pub fn resolve_price(item_id: u32, source: &dyn PriceSource, rules: &[Box<dyn PriceRule>]) -> anyhow::Result<i64> {
    match rules.iter().find(|r| r.applies_to(item_id)) {
        Some(rule) => rule.resolve(item_id, source),
        None       => source.price(item_id),
    }
}

/// Fixed price table, e.g. from the `[[items]]` section of the config.
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    prices: HashMap<u32, i64>,
    names:  HashMap<u32, String>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, id: u32, name: &str, price: i64) -> Self {
        self.prices.insert(id, price);
        if !name.is_empty() {
            self.names.insert(id, name.to_owned());
        }
        self
    }
}

impl PriceSource for StaticPrices {
    fn price(&self, item_id: u32) -> anyhow::Result<i64> {
        self.prices.get(&item_id).copied().ok_or_else(|| anyhow!("no price for item {}", item_id))
    }

    fn name(&self, item_id: u32) -> anyhow::Result<String> {
        self.names.get(&item_id).cloned().ok_or_else(|| anyhow!("no name for item {}", item_id))
    }
}

// ---------------------------------------------------------------------------
// Bounded map (insertion-order eviction)
// ---------------------------------------------------------------------------

struct BoundedMap<K, V> {
    entries: HashMap<K, V>,
    order:   VecDeque<K>,
}

impl<K: Hash + Eq + Clone, V> BoundedMap<K, V> {
    fn new() -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new() }
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
            while self.order.len() > MAX_CACHE_ENTRIES {
                if let Some(old) = self.order.pop_front() {
                    self.entries.remove(&old);
                }
            }
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&V) -> bool) {
        self.entries.retain(|_, v| keep(v));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

// ---------------------------------------------------------------------------
// PriceCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchRequest {
    Price(u32),
    Name(u32),
}

struct CachedPrice {
    price:      i64,
    fetched_at: i64,
}

struct CachedTotal {
    value:       i64,
    computed_at: i64,
    loot:        BTreeMap<u32, u64>,
}

struct CacheState {
    prices:  BoundedMap<u32, CachedPrice>,
    names:   BoundedMap<u32, String>,
    totals:  BoundedMap<String, CachedTotal>,
    pending: HashSet<FetchRequest>,
}

impl CacheState {
    fn store_price(&mut self, item_id: u32, price: i64, now_ms: i64) {
        self.pending.remove(&FetchRequest::Price(item_id));
        let changed = self.prices.get(&item_id).map_or(true, |c| c.price != price);
        self.prices.insert(item_id, CachedPrice { price, fetched_at: now_ms });
        if changed {
            self.totals.retain(|t| !t.loot.contains_key(&item_id));
        }
    }

    fn store_name(&mut self, item_id: u32, name: String) {
        self.pending.remove(&FetchRequest::Name(item_id));
        self.names.insert(item_id, name);
    }
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct PriceCache {
    state:    Arc<Mutex<CacheState>>,
    requests: mpsc::Sender<FetchRequest>,
}

impl PriceCache {
    /// Create a cache and the receiving end of its fetch queue.
    pub fn new(queue: usize) -> (Self, mpsc::Receiver<FetchRequest>) {
        let (tx, rx) = mpsc::channel(queue);
        let state = CacheState {
            prices:  BoundedMap::new(),
            names:   BoundedMap::new(),
            totals:  BoundedMap::new(),
            pending: HashSet::new(),
        };
        (Self { state: Arc::new(Mutex::new(state)), requests: tx }, rx)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock_state(&self.state)
    }

    /// Queue a fetch unless one is already in flight. Caller holds the lock.
    fn request(&self, state: &mut CacheState, req: FetchRequest) {
        if !state.pending.insert(req) {
            return;
        }
        if let Err(e) = self.requests.try_send(req) {
            tracing::debug!("Fetch queue rejected {:?}: {}", req, e);
            state.pending.remove(&req);
        }
    }

    /// Cached price of an item. Stale prices are still returned while a
    /// refresh is queued; unknown prices queue a fetch and return `None`.
    pub fn price(&self, item_id: u32, now_ms: i64) -> Option<i64> {
        let mut state = self.lock();
        let cached = state.prices.get(&item_id).map(|c| (c.price, now_ms - c.fetched_at > PRICE_TTL_MS));
        match cached {
            Some((price, false)) => Some(price),
            Some((price, true)) => {
                self.request(&mut state, FetchRequest::Price(item_id));
                Some(price)
            }
            None => {
                self.request(&mut state, FetchRequest::Price(item_id));
                None
            }
        }
    }

    /// Item name, or a placeholder while the real name is being fetched.
    pub fn name(&self, item_id: u32) -> String {
        let mut state = self.lock();
        if let Some(name) = state.names.get(&item_id) {
            return name.clone();
        }
        self.request(&mut state, FetchRequest::Name(item_id));
        format!("Item {}", item_id)
    }

    /// Value of a loot map at current prices; unknown prices count as 0.
    pub fn value_of(&self, loot: &BTreeMap<u32, u64>, now_ms: i64) -> i64 {
        loot.iter()
            .map(|(&id, &qty)| self.price(id, now_ms).unwrap_or(0).saturating_mul(qty as i64))
            .fold(0i64, i64::saturating_add)
    }

    /// Value of a loot map, cached under `key` for a day. A total is only
    /// cached once every price in it is known, is dropped as soon as one of
    /// its prices changes, and is recomputed when `loot` differs from the
    /// map it was computed for.
    pub fn total_value(&self, key: &str, loot: &BTreeMap<u32, u64>, now_ms: i64) -> i64 {
        if loot.is_empty() {
            return 0;
        }
        {
            let state = self.lock();
            if let Some(t) = state.totals.get(&key.to_owned()) {
                if now_ms - t.computed_at < TOTAL_TTL_MS && t.loot == *loot {
                    return t.value;
                }
            }
        }

        let mut complete = true;
        let mut value = 0i64;
        for (&id, &qty) in loot {
            match self.price(id, now_ms) {
                Some(p) => value = value.saturating_add(p.saturating_mul(qty as i64)),
                None    => complete = false,
            }
        }

        if complete {
            self.lock().totals.insert(key.to_owned(), CachedTotal { value, computed_at: now_ms, loot: loot.clone() });
        }
        value
    }

    /// Record a fetched (or host-supplied) price.
    pub fn insert_price(&self, item_id: u32, price: i64, now_ms: i64) {
        self.lock().store_price(item_id, price, now_ms);
    }

    pub fn insert_name(&self, item_id: u32, name: String) {
        self.lock().store_name(item_id, name);
    }

    /// A fetch failed; leave the cache as it was so a later read retries.
    pub fn fetch_failed(&self, req: FetchRequest) {
        self.lock().pending.remove(&req);
    }

    pub fn clear_totals(&self) {
        self.lock().totals.clear();
    }

    pub fn is_pending(&self, req: FetchRequest) -> bool {
        self.lock().pending.contains(&req)
    }
}

// ---------------------------------------------------------------------------
// Fetch worker
// ---------------------------------------------------------------------------

/// Serve fetch requests until every other `PriceCache` handle is dropped.
/// Source calls run on the blocking pool; failures are logged and swallowed.
pub async fn run_fetcher(
    mut requests: mpsc::Receiver<FetchRequest>,
    cache:        PriceCache,
    source:       Arc<dyn PriceSource>,
    rules:        Arc<Vec<Box<dyn PriceRule>>>,
) {
    // Keep only the shared state; holding the handle would keep our own
    // request queue open forever.
    let state = Arc::clone(&cache.state);
    drop(cache);

    while let Some(req) = requests.recv().await {
        let source = Arc::clone(&source);
        let rules  = Arc::clone(&rules);
        let result = tokio::task::spawn_blocking(move || match req {
            FetchRequest::Price(id) => resolve_price(id, source.as_ref(), &rules).map(Fetched::Price),
            FetchRequest::Name(id)  => source.name(id).map(Fetched::Name),
        })
        .await;

        let mut cached = lock_state(&state);
        match (req, result) {
            (FetchRequest::Price(id), Ok(Ok(Fetched::Price(price)))) => {
                tracing::debug!("Fetched price for item {}: {}", id, price);
                cached.store_price(id, price, crate::now_ms());
            }
            (FetchRequest::Name(id), Ok(Ok(Fetched::Name(name)))) => {
                cached.store_name(id, name);
            }
            (_, Ok(Ok(_))) => {
                cached.pending.remove(&req);
            }
            (_, Ok(Err(e))) => {
                tracing::warn!("Lookup {:?} failed: {}", req, e);
                cached.pending.remove(&req);
            }
            (_, Err(e)) => {
                tracing::warn!("Lookup task {:?} panicked: {}", req, e);
                cached.pending.remove(&req);
            }
        }
    }
    tracing::debug!("Price fetcher stopped");
}

enum Fetched {
    Price(i64),
    Name(String),
}
