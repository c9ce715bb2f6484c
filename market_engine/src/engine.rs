//! Price update engine
//!
//! Turns one cycle's triggers, trend scores and selector state into a new
//! snapshot plus the history rows to persist. [`PriceEngine::apply`] is the
//! pure step; [`PriceEngine::update`] gathers its inputs first.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc};
use data_collector::trend::TrendSource;
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::Rng;
use shared::{EventDescriptor, PriceRecord, Snapshot, StockMeta, StockState, TriggerMap, VolatilityTier, MIN_PRICE};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use crate::events::{ActiveMerge, GlobalEventSelector, FREEZE_SECS};
use crate::universe::SpecialRule;

/// High/low statistics reset after this long.
const RANGE_WINDOW_HOURS: i64 = 24;

/// Largest fractional move one cycle may apply (+1000%).
pub const MAX_DELTA: f64 = 10.0;

/// Source of the uniform volatility draw, in `[-1, 1]`.
pub trait VolatilityDraw: Send {
    fn unit(&mut self) -> f64;
}

pub struct RandomDraw(pub StdRng);

impl VolatilityDraw for RandomDraw {
    fn unit(&mut self) -> f64 {
        self.0.gen_range(-1.0..=1.0)
    }
}

/// Always returns the same draw.
pub struct PinnedDraw(pub f64);

impl VolatilityDraw for PinnedDraw {
    fn unit(&mut self) -> f64 {
        self.0.clamp(-1.0, 1.0)
    }
}

/// How trend scores are gathered for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendMode {
    Off,
    Full,
    Quick,
}

/// Everything the pure update step needs besides the snapshot.
#[derive(Debug, Default)]
pub struct CycleInputs {
    pub now: Option<DateTime<Utc>>,
    pub triggers: TriggerMap,
    pub trends: HashMap<String, f64>,
    /// Symbols frozen by the event selector.
    pub frozen: HashSet<String>,
    pub merges: Vec<ActiveMerge>,
}

impl CycleInputs {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Some(now),
            ..Default::default()
        }
    }

    pub fn with_triggers(mut self, triggers: TriggerMap) -> Self {
        self.triggers = triggers;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub snapshot: Snapshot,
    pub history: Vec<PriceRecord>,
    pub event: Option<EventDescriptor>,
}

/// Parameters of one gathered cycle.
#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub triggers: TriggerMap,
    pub trend_mode: TrendMode,
    pub roll_events: bool,
    pub now: DateTime<Utc>,
}

pub struct PriceEngine {
    meta: BTreeMap<String, StockMeta>,
    rules: Vec<SpecialRule>,
    offset: FixedOffset,
    draw: Box<dyn VolatilityDraw>,
    resistance: bool,
}

impl PriceEngine {
    pub fn new(
        meta: BTreeMap<String, StockMeta>,
        rules: Vec<SpecialRule>,
        offset: FixedOffset,
        draw: Box<dyn VolatilityDraw>,
    ) -> Self {
        Self {
            meta,
            rules,
            offset,
            draw,
            resistance: false,
        }
    }

    /// Dampen moves near a symbol's maximum instead of only clamping.
    pub fn with_resistance(mut self, enabled: bool) -> Self {
        self.resistance = enabled;
        self
    }

    pub fn meta(&self) -> &BTreeMap<String, StockMeta> {
        &self.meta
    }

    /// Roll events, gather trend scores and apply everything in one pass.
    pub async fn update(
        &mut self,
        snapshot: &Snapshot,
        request: CycleRequest,
        selector: &mut GlobalEventSelector,
        trend: Option<&dyn TrendSource>,
    ) -> CycleOutcome {
        let now = request.now;
        let mut triggers = request.triggers;

        selector.sweep(now);
        let event = if request.roll_events {
            selector.check_for_global_events(now)
        } else {
            None
        };
        if let Some(event) = &event {
            triggers.merge(event.triggers.clone());
        }

        let frozen = selector.frozen_stocks(now).into_iter().map(|(s, _)| s).collect();
        let merges = selector.active_merges(now);
        let trends = match trend {
            Some(source) if request.trend_mode != TrendMode::Off => {
                fetch_trends(source, snapshot, request.trend_mode, now).await
            }
            _ => HashMap::new(),
        };

        let inputs = CycleInputs {
            now: Some(now),
            triggers,
            trends,
            frozen,
            merges,
        };
        let mut outcome = self.apply(snapshot, &inputs);
        outcome.event = event;
        outcome
    }

    /// Compute the next snapshot. Does no I/O.
    pub fn apply(&mut self, snapshot: &Snapshot, inputs: &CycleInputs) -> CycleOutcome {
        let now = inputs.now.unwrap_or_else(Utc::now);
        let local = now.with_timezone(&self.offset);
        let triggers = &inputs.triggers;
        let time_factor = triggers.time_freeze.unwrap_or(1.0).max(0.0);

        for symbol in triggers.deltas.keys() {
            if !snapshot.stocks.contains_key(symbol) {
                debug!("Ignoring trigger for unknown symbol {}", symbol);
            }
        }

        // merged pairs move together
        let mut shared_draws: HashMap<&str, f64> = HashMap::new();
        for merge in &inputs.merges {
            let (a, b) = (merge.pair.0.as_str(), merge.pair.1.as_str());
            if snapshot.stocks.contains_key(a) && snapshot.stocks.contains_key(b) {
                let unit = self.draw.unit();
                shared_draws.insert(a, unit);
                shared_draws.insert(b, unit);
            }
        }

        let mut next = snapshot.clone();
        let mut history = Vec::with_capacity(snapshot.stocks.len());

        for (symbol, state) in next.stocks.iter_mut() {
            let meta = self.meta.get(symbol);
            let trend = inputs.trends.get(symbol).copied().unwrap_or(0.0);
            let old = state.price;

            if triggers.freeze.contains(symbol) {
                state.frozen_until = Some(now + Duration::seconds(FREEZE_SECS));
            } else if !state.is_frozen_at(now) {
                state.frozen_until = None;
            }

            if state.is_frozen_at(now) || inputs.frozen.contains(symbol) {
                debug!("🧊 {} frozen at {:.2}", symbol, old);
                state.last_change = 0.0;
            } else {
                let unit = match shared_draws.get(symbol.as_str()) {
                    Some(unit) => *unit,
                    None => self.draw.unit(),
                };
                let mut trigger = triggers.delta(symbol).unwrap_or(0.0);
                let mut range = meta.map_or(VolatilityTier::Medium, |m| m.tier).base_range() * time_factor;
                let mut drift = 0.0;

                for rule in &self.rules {
                    match rule {
                        SpecialRule::VolatilityWindow { symbol: s, start_hour, end_hour, factor }
                            if s == symbol =>
                        {
                            if data_collector::triggers::in_hour_window(local.hour(), *start_hour, *end_hour) {
                                range *= factor;
                            }
                        }
                        SpecialRule::IgnoreNegativeOn { symbol: s, weekday } if s == symbol => {
                            if local.weekday() == *weekday && trigger < 0.0 {
                                trigger = 0.0;
                            }
                        }
                        _ => {}
                    }
                }

                if self.resistance {
                    if let Some(max) = meta.and_then(|m| m.max_price) {
                        let (damp, pull) = resistance(old, max);
                        range *= damp;
                        drift += pull;
                    }
                }

                let delta = bounded_delta(unit * range + trigger + trend + drift);
                let new = clamp_price(old * (1.0 + delta), old, meta);
                state.last_change = (new - old) / old * 100.0;
                state.price = new;
                let traded = ((delta.abs() * 10_000.0).round() as u64).saturating_add(1);
                state.volume = state.volume.saturating_add(traded);
                debug!("{}: {:.4} → {:.4} ({:+.2}%)", symbol, old, new, state.last_change);
            }

            track_range(state, now);
            history.push(PriceRecord {
                symbol: symbol.clone(),
                price: state.price,
                trend_score: trend,
                timestamp: now,
            });
        }

        if let Some(text) = &triggers.display {
            info!("📣 {}", text);
            next.last_event = Some(text.clone());
        }

        CycleOutcome {
            snapshot: next,
            history,
            event: None,
        }
    }
}

/// Range dampening factor and drift for a price near its maximum.
fn resistance(price: f64, max: f64) -> (f64, f64) {
    let ratio = price / max;
    if ratio > 0.95 {
        (0.25, -0.03)
    } else if ratio > 0.8 {
        (0.5, -0.01)
    } else {
        (1.0, 0.0)
    }
}

/// A move can wipe out at most the whole price and add at most [`MAX_DELTA`].
fn bounded_delta(delta: f64) -> f64 {
    if delta.is_nan() {
        return 0.0;
    }
    delta.clamp(-1.0, MAX_DELTA)
}

fn clamp_price(candidate: f64, old: f64, meta: Option<&StockMeta>) -> f64 {
    let floor = meta.map_or(MIN_PRICE, StockMeta::effective_floor);
    let max = meta.and_then(|m| m.max_price);
    let price = if candidate.is_nan() {
        old
    } else if candidate == f64::INFINITY {
        max.unwrap_or(old)
    } else {
        candidate
    };
    let capped = match max {
        Some(max) => price.min(max),
        None => price,
    };
    capped.max(floor)
}

fn track_range(state: &mut StockState, now: DateTime<Utc>) {
    let expired = state
        .range_started
        .map_or(true, |start| now - start >= Duration::hours(RANGE_WINDOW_HOURS));
    if expired {
        state.high_24h = state.price;
        state.low_24h = state.price;
        state.range_started = Some(now);
    } else {
        state.high_24h = state.high_24h.max(state.price);
        state.low_24h = state.low_24h.min(state.price);
    }
}

async fn fetch_trends(
    source: &dyn TrendSource,
    snapshot: &Snapshot,
    mode: TrendMode,
    now: DateTime<Utc>,
) -> HashMap<String, f64> {
    let symbols: Vec<&str> = snapshot.symbols().collect();
    let scores = join_all(symbols.iter().map(|symbol| async move {
        match mode {
            TrendMode::Quick => source.quick_score(symbol, now).await,
            _ => source.score(symbol, now).await,
        }
    }))
    .await;
    symbols
        .into_iter()
        .map(str::to_string)
        .zip(scores)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::{default_meta, special_rules, FRIDAY, NIGHTOWL, PENNY};
    use chrono::{Offset, TimeZone};
    use rand::SeedableRng;
    use shared::StockFlags;

    fn engine(draw: f64) -> PriceEngine {
        PriceEngine::new(default_meta(), special_rules(), Utc.fix(), Box::new(PinnedDraw(draw)))
    }

    fn market(entries: &[(&str, f64)]) -> Snapshot {
        Snapshot {
            stocks: entries
                .iter()
                .map(|(s, p)| (s.to_string(), StockState::new(*p)))
                .collect(),
            last_event: None,
        }
    }

    // 2024-05-07 is a Tuesday, 2024-05-10 a Friday
    fn tuesday(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 7, h, 0, 0).unwrap()
    }

    fn with_meta(symbol: &str, tier: VolatilityTier, max: Option<f64>) -> PriceEngine {
        let mut meta = default_meta();
        meta.insert(
            symbol.to_string(),
            StockMeta {
                name: symbol.to_string(),
                tier,
                floor: None,
                max_price: max,
                flags: StockFlags::default(),
                initial_price: 100.0,
            },
        );
        PriceEngine::new(meta, special_rules(), Utc.fix(), Box::new(PinnedDraw(0.0)))
    }

    #[test]
    fn test_medium_stock_with_five_percent_trigger() {
        let mut engine = with_meta("TEST", VolatilityTier::Medium, None);
        let inputs = CycleInputs::at(tuesday(12)).with_triggers(TriggerMap::new().with_delta("TEST", 0.05));

        let outcome = engine.apply(&market(&[("TEST", 100.0)]), &inputs);
        let state = &outcome.snapshot.stocks["TEST"];
        assert!((state.price - 105.0).abs() < 1e-9);
        assert!((state.last_change - 5.0).abs() < 1e-9);
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.history[0].price, state.price);
    }

    #[test]
    fn test_penny_hits_its_floor() {
        let mut engine = engine(0.0);
        let inputs = CycleInputs::at(tuesday(12)).with_triggers(TriggerMap::new().with_delta(PENNY, -0.5));

        let outcome = engine.apply(&market(&[(PENNY, 0.22)]), &inputs);
        assert_eq!(outcome.snapshot.price(PENNY), Some(0.20));
    }

    #[test]
    fn test_no_price_ever_drops_below_floor() {
        let mut engine = PriceEngine::new(
            default_meta(),
            special_rules(),
            Utc.fix(),
            Box::new(RandomDraw(StdRng::seed_from_u64(11))),
        );
        let meta = default_meta();
        let mut snapshot = crate::universe::default_snapshot();
        let mut triggers = TriggerMap::new();
        for symbol in meta.keys() {
            triggers.add(symbol.as_str(), -0.9);
        }
        for i in 0..50 {
            let inputs = CycleInputs::at(tuesday(12) + Duration::minutes(i)).with_triggers(triggers.clone());
            snapshot = engine.apply(&snapshot, &inputs).snapshot;
            for (symbol, state) in &snapshot.stocks {
                assert!(state.price >= meta[symbol].effective_floor(), "{} at {}", symbol, state.price);
                assert!(state.price >= MIN_PRICE);
            }
        }
    }

    #[test]
    fn test_max_price_caps_main_path() {
        let mut engine = with_meta("CAP", VolatilityTier::Extreme, Some(150.0));
        let inputs = CycleInputs::at(tuesday(12)).with_triggers(TriggerMap::new().with_delta("CAP", 2.0));
        let outcome = engine.apply(&market(&[("CAP", 140.0)]), &inputs);
        assert_eq!(outcome.snapshot.price("CAP"), Some(150.0));
    }

    #[test]
    fn test_max_price_caps_resistance_path() {
        let mut engine = with_meta("CAP", VolatilityTier::Extreme, Some(150.0)).with_resistance(true);
        let inputs = CycleInputs::at(tuesday(12)).with_triggers(TriggerMap::new().with_delta("CAP", 2.0));
        let outcome = engine.apply(&market(&[("CAP", 149.0)]), &inputs);
        assert_eq!(outcome.snapshot.price("CAP"), Some(150.0));
    }

    #[test]
    fn test_resistance_pulls_back_near_max() {
        let mut engine = with_meta("CAP", VolatilityTier::Low, Some(100.0)).with_resistance(true);
        let outcome = engine.apply(&market(&[("CAP", 97.0)]), &CycleInputs::at(tuesday(12)));
        // -3% drift, no trigger, zero draw
        assert!((outcome.snapshot.price("CAP").unwrap() - 94.09).abs() < 1e-9);

        let mut plain = with_meta("CAP", VolatilityTier::Low, Some(100.0));
        let outcome = plain.apply(&market(&[("CAP", 97.0)]), &CycleInputs::at(tuesday(12)));
        assert_eq!(outcome.snapshot.price("CAP"), Some(97.0));
    }

    #[test]
    fn test_last_change_matches_prices() {
        let mut engine = PriceEngine::new(
            default_meta(),
            special_rules(),
            Utc.fix(),
            Box::new(RandomDraw(StdRng::seed_from_u64(5))),
        );
        let before = crate::universe::default_snapshot();
        let after = engine.apply(&before, &CycleInputs::at(tuesday(9))).snapshot;
        for (symbol, state) in &after.stocks {
            let old = before.stocks[symbol].price;
            let expected = (state.price - old) / old * 100.0;
            assert!((state.last_change - expected).abs() < 1e-9, "{}", symbol);
        }
    }

    #[test]
    fn test_freeze_instruction_holds_price_until_expiry() {
        let mut engine = engine(1.0);
        let now = tuesday(12);
        let mut triggers = TriggerMap::new().with_delta("LOVE", 0.5);
        triggers.freeze.push("LOVE".to_string());

        let frozen = engine
            .apply(&market(&[("LOVE", 42.0)]), &CycleInputs::at(now).with_triggers(triggers))
            .snapshot;
        assert_eq!(frozen.price("LOVE"), Some(42.0));
        assert_eq!(frozen.stocks["LOVE"].last_change, 0.0);

        let still = engine.apply(&frozen, &CycleInputs::at(now + Duration::minutes(2))).snapshot;
        assert_eq!(still.price("LOVE"), Some(42.0));

        let resumed = engine.apply(&still, &CycleInputs::at(now + Duration::minutes(3))).snapshot;
        assert!(resumed.price("LOVE").unwrap() > 42.0);
        assert_eq!(resumed.stocks["LOVE"].frozen_until, None);
    }

    #[test]
    fn test_selector_frozen_set_holds_price() {
        let mut engine = engine(1.0);
        let mut inputs = CycleInputs::at(tuesday(12));
        inputs.frozen.insert("SUN".to_string());
        let outcome = engine.apply(&market(&[("SUN", 18.0), ("RAIN", 15.0)]), &inputs);
        assert_eq!(outcome.snapshot.price("SUN"), Some(18.0));
        assert!(outcome.snapshot.price("RAIN").unwrap() > 15.0);
        assert_eq!(outcome.history.len(), 2);
    }

    #[test]
    fn test_nightowl_range_doubles_at_night() {
        let mut engine = engine(1.0);
        let night = engine.apply(&market(&[(NIGHTOWL, 100.0)]), &CycleInputs::at(tuesday(3)));
        let day = engine.apply(&market(&[(NIGHTOWL, 100.0)]), &CycleInputs::at(tuesday(15)));
        assert!((night.snapshot.price(NIGHTOWL).unwrap() - 150.0).abs() < 1e-9);
        assert!((day.snapshot.price(NIGHTOWL).unwrap() - 125.0).abs() < 1e-9);
    }

    #[test]
    fn test_friday_ignores_negative_triggers_on_fridays() {
        let friday = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let triggers = TriggerMap::new().with_delta(FRIDAY, -0.10);
        let mut engine = engine(0.0);

        let on_friday = engine.apply(
            &market(&[(FRIDAY, 13.0)]),
            &CycleInputs::at(friday).with_triggers(triggers.clone()),
        );
        assert_eq!(on_friday.snapshot.price(FRIDAY), Some(13.0));

        let on_tuesday = engine.apply(&market(&[(FRIDAY, 13.0)]), &CycleInputs::at(tuesday(12)).with_triggers(triggers));
        assert!((on_tuesday.snapshot.price(FRIDAY).unwrap() - 11.7).abs() < 1e-9);
    }

    #[test]
    fn test_time_freeze_scales_range() {
        let mut engine = with_meta("TEST", VolatilityTier::Medium, None);
        engine.draw = Box::new(PinnedDraw(1.0));
        let mut triggers = TriggerMap::new();
        triggers.time_freeze = Some(0.2);
        let outcome = engine.apply(&market(&[("TEST", 100.0)]), &CycleInputs::at(tuesday(12)).with_triggers(triggers));
        assert!((outcome.snapshot.price("TEST").unwrap() - 103.0).abs() < 1e-9);
    }

    #[test]
    fn test_display_text_and_unknown_symbols() {
        let mut engine = engine(0.0);
        let triggers = TriggerMap::new()
            .with_delta("NOPE", 0.5)
            .with_display("🚀 To the moon!");
        let outcome = engine.apply(&market(&[("MOON", 69.0)]), &CycleInputs::at(tuesday(12)).with_triggers(triggers));
        assert_eq!(outcome.snapshot.last_event.as_deref(), Some("🚀 To the moon!"));
        assert!(!outcome.snapshot.stocks.contains_key("NOPE"));
        assert_eq!(outcome.snapshot.price("MOON"), Some(69.0));
    }

    #[test]
    fn test_range_window_tracks_and_resets() {
        let mut engine = with_meta("TEST", VolatilityTier::Medium, None);
        let now = tuesday(12);
        let up = TriggerMap::new().with_delta("TEST", 0.10);
        let down = TriggerMap::new().with_delta("TEST", -0.20);

        let s1 = engine.apply(&market(&[("TEST", 100.0)]), &CycleInputs::at(now).with_triggers(up)).snapshot;
        let s2 = engine
            .apply(&s1, &CycleInputs::at(now + Duration::hours(1)).with_triggers(down))
            .snapshot;
        let state = &s2.stocks["TEST"];
        assert!((state.high_24h - 110.0).abs() < 1e-9);
        assert!((state.low_24h - 88.0).abs() < 1e-9);

        let s3 = engine.apply(&s2, &CycleInputs::at(now + Duration::hours(25))).snapshot;
        assert_eq!(s3.stocks["TEST"].high_24h, s3.stocks["TEST"].price);
        assert_eq!(s3.stocks["TEST"].low_24h, s3.stocks["TEST"].price);
    }

    #[test]
    fn test_merged_pair_shares_one_draw() {
        let mut engine = PriceEngine::new(
            default_meta(),
            special_rules(),
            Utc.fix(),
            Box::new(RandomDraw(StdRng::seed_from_u64(21))),
        );
        let now = tuesday(12);
        let mut inputs = CycleInputs::at(now);
        inputs.merges.push(ActiveMerge {
            pair: ("PIZZA".to_string(), "RAIN".to_string()),
            expires: now + Duration::minutes(5),
        });
        // both medium tier, so equal draws give equal relative moves
        let outcome = engine.apply(&market(&[("PIZZA", 10.0), ("RAIN", 20.0)]), &inputs);
        let pizza = outcome.snapshot.stocks["PIZZA"].last_change;
        let rain = outcome.snapshot.stocks["RAIN"].last_change;
        assert!((pizza - rain).abs() < 1e-9);
    }

    #[test]
    fn test_huge_manual_trigger_is_bounded() {
        let mut engine = engine(0.0);
        let now = tuesday(12);

        let up = TriggerMap::new().with_delta("LOVE", 1e308);
        let outcome = engine.apply(&market(&[("LOVE", 42.0)]), &CycleInputs::at(now).with_triggers(up));
        let love = &outcome.snapshot.stocks["LOVE"];
        assert!((love.price - 42.0 * (1.0 + MAX_DELTA)).abs() < 1e-9);
        assert!(love.last_change > 0.0);

        let volume = TriggerMap::new().with_delta("LOVE", 1e16).with_delta("PANIK", -1e16);
        let outcome = engine.apply(&market(&[("LOVE", 42.0), ("PANIK", 6.66)]), &CycleInputs::at(now).with_triggers(volume));
        assert!(outcome.snapshot.stocks["LOVE"].price.is_finite());
        assert_eq!(outcome.snapshot.price("PANIK"), Some(MIN_PRICE));
    }

    #[test]
    fn test_overflowing_candidate_never_falls_to_floor() {
        let love = default_meta()["LOVE"].clone();
        let gold = default_meta()["GOLD"].clone();
        assert_eq!(clamp_price(f64::INFINITY, 42.0, Some(&love)), 42.0);
        assert_eq!(clamp_price(f64::INFINITY, 120.0, Some(&gold)), 500.0);
        assert_eq!(clamp_price(f64::NAN, 42.0, Some(&love)), 42.0);
        assert_eq!(clamp_price(f64::NEG_INFINITY, 42.0, Some(&love)), MIN_PRICE);
    }

    struct FixedTrend(f64);

    #[async_trait::async_trait]
    impl TrendSource for FixedTrend {
        async fn score(&self, _symbol: &str, _now: DateTime<Utc>) -> f64 {
            self.0
        }

        async fn quick_score(&self, _symbol: &str, _now: DateTime<Utc>) -> f64 {
            self.0 / 2.0
        }
    }

    #[tokio::test]
    async fn test_update_adds_trend_and_respects_mode() {
        let mut engine = with_meta("TEST", VolatilityTier::Medium, None);
        let mut selector = GlobalEventSelector::new(default_meta(), Utc.fix(), StdRng::seed_from_u64(1))
            .with_table(Vec::new());
        let snapshot = market(&[("TEST", 100.0)]);
        let request = |mode| CycleRequest {
            triggers: TriggerMap::new(),
            trend_mode: mode,
            roll_events: true,
            now: tuesday(12),
        };
        let trend: &dyn TrendSource = &FixedTrend(0.08);

        let full = engine.update(&snapshot, request(TrendMode::Full), &mut selector, Some(trend)).await;
        assert!((full.snapshot.price("TEST").unwrap() - 108.0).abs() < 1e-9);
        assert!((full.history[0].trend_score - 0.08).abs() < 1e-12);
        assert!(full.event.is_none());

        let quick = engine.update(&snapshot, request(TrendMode::Quick), &mut selector, Some(trend)).await;
        assert!((quick.snapshot.price("TEST").unwrap() - 104.0).abs() < 1e-9);

        let off = engine.update(&snapshot, request(TrendMode::Off), &mut selector, Some(trend)).await;
        assert_eq!(off.snapshot.price("TEST"), Some(100.0));
    }

    #[tokio::test]
    async fn test_update_applies_fired_event() {
        let mut engine = engine(0.0);
        let boom = crate::events::event_spec("Market Boom")
            .unwrap()
            .with_chance(crate::events::Chance::Fixed(1.0));
        let mut selector = GlobalEventSelector::new(default_meta(), Utc.fix(), StdRng::seed_from_u64(2))
            .with_table(vec![boom]);
        let request = CycleRequest {
            triggers: TriggerMap::new().with_display("chat noise"),
            trend_mode: TrendMode::Off,
            roll_events: true,
            now: tuesday(12),
        };

        let outcome = engine.update(&market(&[("GOLD", 100.0)]), request, &mut selector, None).await;
        assert_eq!(outcome.event.as_ref().unwrap().name, "Market Boom");
        assert!((outcome.snapshot.price("GOLD").unwrap() - 110.0).abs() < 1e-9);
        assert!(outcome.snapshot.last_event.unwrap().contains("Market Boom"));
    }
}
