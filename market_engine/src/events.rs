//! Global market events
//!
//! A [`GlobalEventSelector`] is owned by whoever drives the market cycles and
//! is asked once per tick whether something big happens. Outside the cooldown
//! it walks its event table in ascending `priority` and fires the first event
//! whose independent roll succeeds, so a low priority number means the event
//! pre-empts everything listed after it in the same tick.
//!
//! The selector also owns two short-lived maps:
//! - frozen symbols (symbol → expiry), written by "freeze" events
//! - merged pairs (pair → expiry), written by "mutation" events
//!
//! Both are purged lazily whenever they are read and explicitly by
//! [`GlobalEventSelector::sweep`], which the market calls once per cycle.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Utc, Weekday};
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use serde::Serialize;
use shared::{EventDescriptor, Rarity, StockMeta, TriggerMap};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

pub const EVENT_COOLDOWN_SECS: i64 = 10 * 60;
pub const FREEZE_SECS: i64 = 3 * 60;
pub const MERGE_MIN_SECS: i64 = 5 * 60;
pub const MERGE_MAX_SECS: i64 = 10 * 60;

/// Volatility multiplier while time stands still.
pub const TIME_FREEZE_MULTIPLIER: f64 = 0.2;

/// Bonus granted to both symbols of a fresh merge.
pub const MERGE_BONUS: f64 = 0.15;

/// How likely an event is to fire on a given tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Chance {
    Fixed(f64),
    /// Certain on Saturday and Sunday, impossible otherwise.
    WeekendOnly,
}

impl Chance {
    pub fn at(&self, local: &DateTime<FixedOffset>) -> f64 {
        match self {
            Chance::Fixed(p) => p.clamp(0.0, 1.0),
            Chance::WeekendOnly => match local.weekday() {
                Weekday::Sat | Weekday::Sun => 1.0,
                _ => 0.0,
            },
        }
    }
}

/// What a generator produced.
pub struct EventEffect {
    pub description: String,
    pub triggers: TriggerMap,
    pub duration: Option<std::time::Duration>,
}

impl EventEffect {
    fn instant(description: impl Into<String>, triggers: TriggerMap) -> Self {
        Self {
            description: description.into(),
            triggers,
            duration: None,
        }
    }
}

/// Everything a generator may look at or change.
pub struct EventContext<'a> {
    pub now: DateTime<Utc>,
    pub rng: &'a mut StdRng,
    pub universe: &'a BTreeMap<String, StockMeta>,
    pub frozen: &'a mut HashMap<String, DateTime<Utc>>,
    pub merged: &'a mut HashMap<(String, String), DateTime<Utc>>,
}

impl EventContext<'_> {
    fn symbols(&self) -> Vec<&str> {
        self.universe.keys().map(String::as_str).collect()
    }

    fn pick(&mut self) -> Option<String> {
        self.universe.keys().choose(self.rng).cloned()
    }

    fn pick_many(&mut self, n: usize) -> Vec<String> {
        self.universe.keys().cloned().choose_multiple(self.rng, n)
    }

    fn flagged(&self, flag: fn(&StockMeta) -> bool) -> Vec<&str> {
        self.universe
            .iter()
            .filter(|(_, meta)| flag(meta))
            .map(|(symbol, _)| symbol.as_str())
            .collect()
    }
}

/// Returns `None` when the event cannot apply right now; the table walk then
/// moves on to the next entry.
pub type Generator = fn(&mut EventContext<'_>) -> Option<EventEffect>;

#[derive(Clone)]
pub struct EventSpec {
    /// Lower fires first.
    pub priority: u8,
    pub name: &'static str,
    pub emoji: &'static str,
    pub rarity: Rarity,
    pub chance: Chance,
    pub global_impact: bool,
    pub generate: Generator,
}

impl EventSpec {
    pub fn with_chance(mut self, chance: Chance) -> Self {
        self.chance = chance;
        self
    }
}

impl std::fmt::Debug for EventSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSpec")
            .field("priority", &self.priority)
            .field("name", &self.name)
            .field("rarity", &self.rarity)
            .field("chance", &self.chance)
            .finish()
    }
}

/// Display fields of the last fired event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredEvent {
    pub name: String,
    pub description: String,
    pub rarity: Rarity,
    pub fired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveMerge {
    pub pair: (String, String),
    pub expires: DateTime<Utc>,
}

impl ActiveMerge {
    pub fn contains(&self, symbol: &str) -> bool {
        self.pair.0 == symbol || self.pair.1 == symbol
    }
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SelectorStatus {
    pub last_event: Option<FiredEvent>,
    pub frozen: Vec<(String, DateTime<Utc>)>,
    pub merges: Vec<ActiveMerge>,
    pub cooldown_remaining_secs: i64,
}

pub struct GlobalEventSelector {
    table: Vec<EventSpec>,
    universe: BTreeMap<String, StockMeta>,
    rng: StdRng,
    offset: FixedOffset,
    cooldown: Duration,
    last_event_time: Option<DateTime<Utc>>,
    frozen: HashMap<String, DateTime<Utc>>,
    merged: HashMap<(String, String), DateTime<Utc>>,
    last_fired: Option<FiredEvent>,
}

impl GlobalEventSelector {
    pub fn new(universe: BTreeMap<String, StockMeta>, offset: FixedOffset, rng: StdRng) -> Self {
        let mut selector = Self {
            table: Vec::new(),
            universe,
            rng,
            offset,
            cooldown: Duration::seconds(EVENT_COOLDOWN_SECS),
            last_event_time: None,
            frozen: HashMap::new(),
            merged: HashMap::new(),
            last_fired: None,
        };
        selector.set_table(default_table());
        selector
    }

    pub fn with_table(mut self, table: Vec<EventSpec>) -> Self {
        self.set_table(table);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    fn set_table(&mut self, mut table: Vec<EventSpec>) {
        // stable: equal priorities keep their listed order
        table.sort_by_key(|spec| spec.priority);
        self.table = table;
    }

    pub fn table(&self) -> &[EventSpec] {
        &self.table
    }

    /// Roll for a global event at `now`.
    pub fn check_for_global_events(&mut self, now: DateTime<Utc>) -> Option<EventDescriptor> {
        if let Some(last) = self.last_event_time {
            if now - last < self.cooldown {
                return None;
            }
        }
        self.sweep(now);

        let local = now.with_timezone(&self.offset);
        let fired = {
            let mut ctx = EventContext {
                now,
                rng: &mut self.rng,
                universe: &self.universe,
                frozen: &mut self.frozen,
                merged: &mut self.merged,
            };
            self.table.iter().find_map(|spec| {
                if !ctx.rng.gen_bool(spec.chance.at(&local)) {
                    return None;
                }
                let effect = (spec.generate)(&mut ctx);
                if effect.is_none() {
                    debug!("{} rolled but does not apply right now", spec.name);
                }
                effect.map(|effect| (spec, effect))
            })
        };

        let (spec, effect) = fired?;
        let mut triggers = effect.triggers;
        triggers.display = Some(format!("{} {}: {}", spec.emoji, spec.name, effect.description));

        self.last_event_time = Some(now);
        self.last_fired = Some(FiredEvent {
            name: spec.name.to_string(),
            description: effect.description.clone(),
            rarity: spec.rarity,
            fired_at: now,
        });
        info!("🎲 Global event {} ({}): {}", spec.name, spec.rarity, effect.description);

        Some(EventDescriptor {
            name: spec.name.to_string(),
            description: effect.description,
            rarity: spec.rarity,
            triggers,
            duration: effect.duration,
            global_impact: spec.global_impact,
        })
    }

    /// Drop expired freezes and merges.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        self.frozen.retain(|_, expiry| *expiry > now);
        self.merged.retain(|_, expiry| *expiry > now);
    }

    pub fn is_stock_frozen(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.frozen.get(symbol) {
            Some(expiry) if *expiry > now => true,
            Some(_) => {
                self.frozen.remove(symbol);
                false
            }
            None => false,
        }
    }

    pub fn freeze(&mut self, symbol: impl Into<String>, until: DateTime<Utc>) {
        self.frozen.insert(symbol.into(), until);
    }

    pub fn frozen_stocks(&mut self, now: DateTime<Utc>) -> Vec<(String, DateTime<Utc>)> {
        self.frozen.retain(|_, expiry| *expiry > now);
        let mut frozen: Vec<_> = self.frozen.iter().map(|(s, e)| (s.clone(), *e)).collect();
        frozen.sort();
        frozen
    }

    pub fn active_merges(&mut self, now: DateTime<Utc>) -> Vec<ActiveMerge> {
        self.merged.retain(|_, expiry| *expiry > now);
        let mut merges: Vec<_> = self
            .merged
            .iter()
            .map(|(pair, expires)| ActiveMerge {
                pair: pair.clone(),
                expires: *expires,
            })
            .collect();
        merges.sort_by(|a, b| a.pair.cmp(&b.pair));
        merges
    }

    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.last_event_time {
            Some(last) => (self.cooldown - (now - last)).max(Duration::zero()),
            None => Duration::zero(),
        }
    }

    pub fn last_fired(&self) -> Option<&FiredEvent> {
        self.last_fired.as_ref()
    }

    pub fn status(&mut self, now: DateTime<Utc>) -> SelectorStatus {
        SelectorStatus {
            last_event: self.last_fired.clone(),
            frozen: self.frozen_stocks(now),
            merges: self.active_merges(now),
            cooldown_remaining_secs: self.cooldown_remaining(now).num_seconds(),
        }
    }
}

/* ----------------------- Event table ------------------------ */

pub fn default_table() -> Vec<EventSpec> {
    use Rarity::*;

    fn spec(
        priority: u8,
        name: &'static str,
        emoji: &'static str,
        rarity: Rarity,
        chance: Chance,
        global_impact: bool,
        generate: Generator,
    ) -> EventSpec {
        EventSpec {
            priority,
            name,
            emoji,
            rarity,
            chance,
            global_impact,
            generate,
        }
    }

    vec![
        spec(10, "Black Swan", "🦢", Mythic, Chance::Fixed(0.01), true, black_swan),
        spec(20, "Rug Pull", "🧶", Legendary, Chance::Fixed(0.02), false, rug_pull),
        spec(30, "Mutation", "🧬", Epic, Chance::Fixed(0.03), false, mutation),
        spec(40, "Market Crash", "📉", Rare, Chance::Fixed(0.04), true, market_crash),
        spec(50, "Market Boom", "📈", Rare, Chance::Fixed(0.05), true, market_boom),
        spec(60, "Time Freeze", "⏳", Rare, Chance::Fixed(0.05), true, time_freeze),
        spec(70, "Short Squeeze", "🩳", Uncommon, Chance::Fixed(0.05), false, short_squeeze),
        spec(80, "Whale Dump", "🐋", Uncommon, Chance::Fixed(0.06), false, whale_dump),
        spec(90, "Golden Hour", "🌅", Uncommon, Chance::Fixed(0.04), false, golden_hour),
        spec(100, "Storm Front", "⛈️", Uncommon, Chance::Fixed(0.07), true, storm_front),
        spec(110, "Freeze Hour", "🧊", Uncommon, Chance::Fixed(0.08), false, freeze_hour),
        spec(120, "Food Festival", "🍔", Common, Chance::Fixed(0.08), false, food_festival),
        spec(130, "Meme Rally", "🐸", Common, Chance::Fixed(0.10), false, meme_rally),
        spec(140, "Sector Rotation", "🔄", Common, Chance::Fixed(0.10), false, sector_rotation),
        spec(150, "Influencer Post", "📱", Common, Chance::Fixed(0.20), false, influencer_post),
        spec(255, "Weekend Frenzy", "🎉", Common, Chance::WeekendOnly, true, weekend_frenzy),
    ]
}

/// Look up one entry of the default table by name.
pub fn event_spec(name: &str) -> Option<EventSpec> {
    default_table().into_iter().find(|spec| spec.name == name)
}

fn everyone(ctx: &EventContext<'_>, delta: f64) -> TriggerMap {
    let mut triggers = TriggerMap::new();
    for symbol in ctx.symbols() {
        triggers.add(symbol, delta);
    }
    triggers
}

fn black_swan(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let symbols: Vec<String> = ctx.symbols().into_iter().map(str::to_string).collect();
    if symbols.is_empty() {
        return None;
    }
    let mut triggers = TriggerMap::new();
    for symbol in symbols {
        let delta = ctx.rng.gen_range(-0.20..=0.20);
        triggers.add(symbol, delta);
    }
    Some(EventEffect::instant("Nobody saw this coming, every price is thrown around", triggers))
}

fn rug_pull(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let crypto = ctx.flagged(|m| m.flags.crypto);
    if crypto.is_empty() {
        return None;
    }
    let mut triggers = TriggerMap::new();
    for symbol in &crypto {
        triggers.add(*symbol, -0.35);
    }
    Some(EventEffect::instant(
        format!("The devs vanished, {} collapse", crypto.join(", ")),
        triggers,
    ))
}

fn mutation(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let candidates: Vec<String> = ctx
        .universe
        .keys()
        .filter(|s| !ctx.merged.keys().any(|(a, b)| a == *s || b == *s))
        .cloned()
        .collect();
    let mut pair: Vec<String> = candidates.choose_multiple(ctx.rng, 2).cloned().collect();
    if pair.len() < 2 {
        return None;
    }
    pair.sort();
    let (a, b) = (pair[0].clone(), pair[1].clone());

    let secs = ctx.rng.gen_range(MERGE_MIN_SECS..=MERGE_MAX_SECS);
    ctx.merged.insert((a.clone(), b.clone()), ctx.now + Duration::seconds(secs));

    let triggers = TriggerMap::new()
        .with_delta(a.as_str(), MERGE_BONUS)
        .with_delta(b.as_str(), MERGE_BONUS);
    Some(EventEffect {
        description: format!("{} and {} fused for {} minutes", a, b, secs / 60),
        triggers,
        duration: Some(std::time::Duration::from_secs(secs as u64)),
    })
}

fn market_crash(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    Some(EventEffect::instant("Everything goes red", everyone(ctx, -0.12)))
}

fn market_boom(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    Some(EventEffect::instant("Everything goes green", everyone(ctx, 0.10)))
}

fn time_freeze(_ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let mut triggers = TriggerMap::new();
    triggers.time_freeze = Some(TIME_FREEZE_MULTIPLIER);
    Some(EventEffect::instant("Time stands still, the whole market barely moves", triggers))
}

fn short_squeeze(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let symbol = ctx.pick()?;
    let description = format!("Shorts on {} are getting squeezed", symbol);
    Some(EventEffect::instant(description, TriggerMap::new().with_delta(symbol, 0.30)))
}

fn whale_dump(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let symbol = ctx.pick()?;
    let description = format!("A whale dumped its {} bags", symbol);
    Some(EventEffect::instant(description, TriggerMap::new().with_delta(symbol, -0.25)))
}

fn golden_hour(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let lucky = ctx.pick_many(3);
    if lucky.is_empty() {
        return None;
    }
    let mut triggers = TriggerMap::new();
    for symbol in &lucky {
        triggers.add(symbol.as_str(), 0.07);
    }
    Some(EventEffect::instant(format!("Golden light on {}", lucky.join(", ")), triggers))
}

fn storm_front(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let mut triggers = TriggerMap::new();
    for (symbol, meta) in ctx.universe.iter() {
        let delta = if meta.flags.weather { 0.10 } else { -0.02 };
        triggers.add(symbol.as_str(), delta);
    }
    Some(EventEffect::instant("A storm rolls in, weather stocks surge", triggers))
}

fn freeze_hour(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let now = ctx.now;
    let candidates: Vec<String> = ctx
        .universe
        .keys()
        .filter(|s| ctx.frozen.get(*s).map_or(true, |expiry| *expiry <= now))
        .cloned()
        .collect();
    let count = ctx.rng.gen_range(1..=2);
    let mut chosen: Vec<String> = candidates.choose_multiple(ctx.rng, count).cloned().collect();
    if chosen.is_empty() {
        return None;
    }
    chosen.sort();

    let until = now + Duration::seconds(FREEZE_SECS);
    for symbol in &chosen {
        ctx.frozen.insert(symbol.clone(), until);
    }

    let mut triggers = TriggerMap::new();
    triggers.freeze = chosen.clone();
    Some(EventEffect {
        description: format!("{} frozen for {} minutes", chosen.join(", "), FREEZE_SECS / 60),
        triggers,
        duration: Some(std::time::Duration::from_secs(FREEZE_SECS as u64)),
    })
}

fn food_festival(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let food = ctx.flagged(|m| m.flags.food);
    if food.is_empty() {
        return None;
    }
    let mut triggers = TriggerMap::new();
    for symbol in &food {
        triggers.add(*symbol, 0.06);
    }
    Some(EventEffect::instant("Street food festival in town", triggers))
}

fn meme_rally(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let memes = ctx.flagged(|m| m.flags.meme);
    if memes.is_empty() {
        return None;
    }
    let mut triggers = TriggerMap::new();
    for symbol in &memes {
        triggers.add(*symbol, 0.08);
    }
    Some(EventEffect::instant("A new meme format goes viral", triggers))
}

fn sector_rotation(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let pair = ctx.pick_many(2);
    let [from, to] = pair.as_slice() else {
        return None;
    };
    let triggers = TriggerMap::new()
        .with_delta(from.as_str(), -0.06)
        .with_delta(to.as_str(), 0.06);
    Some(EventEffect::instant(format!("Money rotates out of {} into {}", from, to), triggers))
}

fn influencer_post(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let symbol = ctx.pick()?;
    let description = format!("An influencer just posted about {}", symbol);
    Some(EventEffect::instant(description, TriggerMap::new().with_delta(symbol, 0.12)))
}

fn weekend_frenzy(ctx: &mut EventContext<'_>) -> Option<EventEffect> {
    let mut triggers = TriggerMap::new();
    for (symbol, meta) in ctx.universe.iter() {
        let delta = if meta.flags.meme { 0.05 } else { 0.02 };
        triggers.add(symbol.as_str(), delta);
    }
    Some(EventEffect::instant("It's the weekend, everybody is trading", triggers))
}
