//! Market orchestration
//!
//! [`Market`] ties the collaborators together and runs one cycle at a time:
//! load the snapshot, gather triggers and trend scores, compute every new
//! price in memory, then commit with a single write. A cycle requested
//! while another is running is rejected with [`MarketError::CycleInProgress`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use data_collector::{random_chaos_event, TrendSource, TriggerDetector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use shared::{ChatMessage, Config, EventDescriptor, Snapshot, StockMeta, StockState, TriggerMap};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{CycleRequest, PriceEngine, RandomDraw, TrendMode};
use crate::error::MarketError;
use crate::events::{GlobalEventSelector, SelectorStatus};
use crate::store::SnapshotStore;
use crate::universe::{default_meta, default_snapshot, special_rules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    Full,
    Light,
    Manual,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub snapshot: Snapshot,
    pub event: Option<EventDescriptor>,
    pub records: usize,
}

impl CycleReport {
    /// Symbol with the largest absolute move this cycle.
    pub fn biggest_mover(&self) -> Option<(&str, f64)> {
        self.snapshot
            .stocks
            .iter()
            .max_by(|a, b| a.1.last_change.abs().total_cmp(&b.1.last_change.abs()))
            .map(|(symbol, state)| (symbol.as_str(), state.last_change))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketStatus {
    pub prices: BTreeMap<String, f64>,
    pub last_event: Option<String>,
    pub events: SelectorStatus,
}

struct MarketState {
    selector: GlobalEventSelector,
    engine: PriceEngine,
    rng: StdRng,
}

pub struct Market {
    store: Arc<dyn SnapshotStore>,
    trend: Option<Arc<dyn TrendSource>>,
    detector: TriggerDetector,
    meta: BTreeMap<String, StockMeta>,
    state: Mutex<MarketState>,
}

impl Market {
    pub fn new(store: Arc<dyn SnapshotStore>, trend: Option<Arc<dyn TrendSource>>, config: &Config) -> Result<Self> {
        let seed = config.seed.unwrap_or_else(rand::random);
        if config.seed.is_some() {
            info!("🎲 Deterministic market, seed {}", seed);
        }
        let offset = config.market_offset;

        let detector = TriggerDetector::with_default_classes(offset)?;
        let selector = GlobalEventSelector::new(default_meta(), offset, StdRng::seed_from_u64(seed));
        let engine = PriceEngine::new(
            default_meta(),
            special_rules(),
            offset,
            Box::new(RandomDraw(StdRng::seed_from_u64(seed.wrapping_add(1)))),
        );
        Ok(Self::from_parts(
            store,
            trend,
            detector,
            selector,
            engine,
            StdRng::seed_from_u64(seed.wrapping_add(2)),
        ))
    }

    pub fn from_parts(
        store: Arc<dyn SnapshotStore>,
        trend: Option<Arc<dyn TrendSource>>,
        detector: TriggerDetector,
        selector: GlobalEventSelector,
        engine: PriceEngine,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            trend,
            detector,
            meta: engine.meta().clone(),
            state: Mutex::new(MarketState { selector, engine, rng }),
        }
    }

    /// Chat triggers, chaos, global events and the full trend score.
    pub async fn run_full_cycle(&self, messages: &[ChatMessage], now: DateTime<Utc>) -> Result<CycleReport> {
        let triggers = self.detector.detect(messages, now);
        self.run_cycle(CycleKind::Full, triggers, true, now).await
    }

    /// Random movement and the quick trend score only.
    pub async fn run_light_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.run_cycle(CycleKind::Light, TriggerMap::new(), false, now).await
    }

    /// Apply hand-written triggers without trend fetching or global events.
    pub async fn apply_manual(&self, overrides: TriggerMap, allow_chaos: bool, now: DateTime<Utc>) -> Result<CycleReport> {
        self.run_cycle(CycleKind::Manual, overrides, allow_chaos, now).await
    }

    async fn run_cycle(
        &self,
        kind: CycleKind,
        mut triggers: TriggerMap,
        allow_chaos: bool,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let mut state = self.state.try_lock().map_err(|_| MarketError::CycleInProgress)?;
        let state = &mut *state;

        let snapshot = self.load_snapshot().await?;

        if allow_chaos {
            let symbols: Vec<String> = snapshot.stocks.keys().cloned().collect();
            if let Some(chaos) = random_chaos_event(&mut state.rng, &symbols) {
                debug!("Chaos rolled: {:?}", chaos.display);
                triggers.merge(chaos);
            }
        }

        let (trend_mode, roll_events) = match kind {
            CycleKind::Full => (TrendMode::Full, true),
            CycleKind::Light => (TrendMode::Quick, false),
            CycleKind::Manual => (TrendMode::Off, false),
        };
        let request = CycleRequest {
            triggers,
            trend_mode,
            roll_events,
            now,
        };
        let outcome = state
            .engine
            .update(&snapshot, request, &mut state.selector, self.trend.as_deref())
            .await;

        self.store.save(&outcome.snapshot).await?;
        if let Err(e) = self.store.append_history(&outcome.history).await {
            warn!("Failed to append {} history rows: {}", outcome.history.len(), e);
        }

        let report = CycleReport {
            kind,
            snapshot: outcome.snapshot,
            event: outcome.event,
            records: outcome.history.len(),
        };
        match report.biggest_mover() {
            Some((symbol, change)) => info!(
                "✅ {:?} cycle done: {} symbols, biggest move {} {:+.2}%",
                kind, report.records, symbol, change
            ),
            None => info!("✅ {:?} cycle done: empty market", kind),
        }
        Ok(report)
    }

    /// Read the stored snapshot, reinitialising once if it is unusable.
    async fn load_snapshot(&self) -> Result<Snapshot> {
        match self.read_snapshot().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!("Snapshot unusable ({}), reinitialising the market", e);
                self.reinitialise().await?;
                self.read_snapshot().await
            }
        }
    }

    async fn read_snapshot(&self) -> Result<Snapshot> {
        let snapshot = match self.store.load().await? {
            Some(value) => Snapshot::from_value(value),
            None => Snapshot::default(),
        };
        if snapshot.is_empty() {
            return Err(MarketError::NoValidSymbols.into());
        }
        Ok(self.reconcile(snapshot))
    }

    /// Keep only listed symbols and add any that are missing.
    fn reconcile(&self, mut snapshot: Snapshot) -> Snapshot {
        snapshot.stocks.retain(|symbol, _| {
            let listed = self.meta.contains_key(symbol);
            if !listed {
                warn!("Dropping unlisted symbol {}", symbol);
            }
            listed
        });
        for (symbol, meta) in &self.meta {
            snapshot.stocks.entry(symbol.clone()).or_insert_with(|| {
                info!("➕ Listing {} at {:.2}", symbol, meta.initial_price);
                StockState::new(meta.initial_price)
            });
        }
        snapshot
    }

    async fn reinitialise(&self) -> Result<()> {
        self.store
            .save(&default_snapshot())
            .await
            .map_err(|e| MarketError::Reinitialise(e.to_string()))?;
        info!("🔄 Market reinitialised at default prices");
        Ok(())
    }

    /// Current prices and event state. Waits for a running cycle to finish.
    pub async fn status(&self, now: DateTime<Utc>) -> Result<MarketStatus> {
        let snapshot = match self.store.load().await? {
            Some(value) => Snapshot::from_value(value),
            None => Snapshot::default(),
        };
        let events = self.state.lock().await.selector.status(now);
        Ok(MarketStatus {
            prices: snapshot.stocks.iter().map(|(s, st)| (s.clone(), st.price)).collect(),
            last_event: snapshot.last_event,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PinnedDraw;
    use crate::store::MemoryStore;
    use crate::universe::PENNY;
    use async_trait::async_trait;
    use chrono::{Offset, TimeZone};
    use serde_json::json;
    use std::time::Duration;

    struct SlowTrend;

    #[async_trait]
    impl TrendSource for SlowTrend {
        async fn score(&self, _symbol: &str, _now: DateTime<Utc>) -> f64 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            0.0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap()
    }

    fn market(store: Arc<MemoryStore>, trend: Option<Arc<dyn TrendSource>>) -> Market {
        let offset = Utc.fix();
        Market::from_parts(
            store,
            trend,
            TriggerDetector::with_default_classes(offset).unwrap(),
            GlobalEventSelector::new(default_meta(), offset, StdRng::seed_from_u64(1)).with_table(Vec::new()),
            PriceEngine::new(default_meta(), special_rules(), offset, Box::new(PinnedDraw(0.0))),
            StdRng::seed_from_u64(2),
        )
    }

    #[tokio::test]
    async fn test_first_cycle_initialises_market() {
        let store = Arc::new(MemoryStore::new());
        let market = market(store.clone(), None);

        let report = market.run_light_cycle(now()).await.unwrap();
        assert_eq!(report.snapshot.stocks.len(), default_meta().len());
        assert_eq!(report.records, default_meta().len());
        assert_eq!(store.history().len(), default_meta().len());

        let saved = Snapshot::from_value(store.document().unwrap());
        assert_eq!(saved, report.snapshot);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_reinitialised() {
        let store = Arc::new(MemoryStore::with_document(json!({
            "LOVE": { "price": "a lot" },
            "lastEvent": "garbage"
        })));
        let market = market(store.clone(), None);

        let report = market.run_light_cycle(now()).await.unwrap();
        assert_eq!(report.snapshot.price("LOVE"), Some(42.0));
    }

    #[tokio::test]
    async fn test_read_failure_retries_once() {
        let store = Arc::new(MemoryStore::new());
        let market = market(store.clone(), None);

        store.fail_loads(1);
        assert!(market.run_light_cycle(now()).await.is_ok());

        store.fail_loads(2);
        assert!(market.run_light_cycle(now()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_symbols_are_listed_and_unknown_dropped() {
        let store = Arc::new(MemoryStore::with_document(json!({
            "PIZZA": { "price": 20.0 },
            "DELISTED": { "price": 3.0 }
        })));
        let market = market(store, None);

        let report = market.run_light_cycle(now()).await.unwrap();
        assert_eq!(report.snapshot.price("PIZZA"), Some(20.0));
        assert_eq!(report.snapshot.price(PENNY), Some(0.25));
        assert!(!report.snapshot.stocks.contains_key("DELISTED"));
    }

    #[tokio::test]
    async fn test_manual_override() {
        let store = Arc::new(MemoryStore::new());
        let market = market(store, Some(Arc::new(SlowTrend)));

        let overrides = TriggerMap::new().with_delta("LOVE", 0.10).with_display("🛠️ Manual pump");
        let report = market.apply_manual(overrides, false, now()).await.unwrap();
        assert!((report.snapshot.price("LOVE").unwrap() - 46.2).abs() < 1e-9);
        assert_eq!(report.snapshot.last_event.as_deref(), Some("🛠️ Manual pump"));
        assert!(report.event.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycle_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let market = market(store, Some(Arc::new(SlowTrend)));

        let (first, second) = tokio::join!(market.run_full_cycle(&[], now()), market.run_light_cycle(now()));
        assert!(first.is_ok());
        let err = second.unwrap_err();
        assert!(matches!(err.downcast_ref::<MarketError>(), Some(MarketError::CycleInProgress)));

        assert!(market.run_light_cycle(now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_history_failure_does_not_fail_cycle() {
        let store = Arc::new(MemoryStore::new());
        store.fail_history(true);
        let market = market(store.clone(), None);

        assert!(market.run_light_cycle(now()).await.is_ok());
        assert!(store.document().is_some());
    }

    #[tokio::test]
    async fn test_full_cycle_uses_chat_triggers() {
        let store = Arc::new(MemoryStore::new());
        let market = market(store, None);
        let messages = vec![ChatMessage::new("sam", "storm warning", now())];

        let report = market.run_full_cycle(&messages, now()).await.unwrap();
        // zero draw: only triggers move prices
        assert_eq!(report.kind, CycleKind::Full);
        assert_ne!(report.snapshot.price("RAIN"), Some(15.0));
        assert!(report.snapshot.last_event.is_some());
    }

    #[tokio::test]
    async fn test_status_reports_prices() {
        let store = Arc::new(MemoryStore::new());
        let market = market(store, None);
        market.run_light_cycle(now()).await.unwrap();

        let status = market.status(now()).await.unwrap();
        assert_eq!(status.prices.len(), default_meta().len());
        assert!(status.events.last_event.is_none());
        assert_eq!(status.events.cooldown_remaining_secs, 0);
    }
}
