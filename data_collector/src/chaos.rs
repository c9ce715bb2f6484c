//! Incidental chaos: a small chance each cycle of a random flavour trigger

use rand::seq::SliceRandom;
use rand::Rng;
use shared::TriggerMap;

pub const CHAOS_PROBABILITY: f64 = 0.15;

/// Volatility multiplier applied while chaos calms the market.
pub const CALM_MULTIPLIER: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaosKind {
    /// One random symbol loses almost everything.
    Knockout,
    /// Value moves from one random symbol to another.
    Transfer,
    /// Global volatility is suppressed for the cycle.
    Calm,
    /// Flat bonus for one random symbol.
    Spotlight,
    /// Small uniform boost for every symbol.
    Tailwind,
}

const CATALOGUE: [ChaosKind; 5] = [
    ChaosKind::Knockout,
    ChaosKind::Transfer,
    ChaosKind::Calm,
    ChaosKind::Spotlight,
    ChaosKind::Tailwind,
];

/// Roll for chaos. Returns a trigger map 15% of the time.
pub fn random_chaos_event<R: Rng + ?Sized>(rng: &mut R, symbols: &[String]) -> Option<TriggerMap> {
    if symbols.is_empty() || !rng.gen_bool(CHAOS_PROBABILITY) {
        return None;
    }
    let kind = *CATALOGUE.choose(rng)?;
    chaos_event(kind, rng, symbols)
}

/// Build the trigger map for one chaos kind.
pub fn chaos_event<R: Rng + ?Sized>(kind: ChaosKind, rng: &mut R, symbols: &[String]) -> Option<TriggerMap> {
    let triggers = match kind {
        ChaosKind::Knockout => {
            let victim = symbols.choose(rng)?;
            TriggerMap::new()
                .with_delta(victim.as_str(), -0.9)
                .with_display(format!("💥 K.O.! {} got knocked out", victim))
        }
        ChaosKind::Transfer => {
            let mut pair = symbols.choose_multiple(rng, 2);
            let (from, to) = (pair.next()?, pair.next()?);
            let amount = rng.gen_range(0.05..=0.15);
            TriggerMap::new()
                .with_delta(from.as_str(), -amount)
                .with_delta(to.as_str(), amount)
                .with_display(format!("🔀 Value drifts from {} to {}", from, to))
        }
        ChaosKind::Calm => {
            let mut triggers = TriggerMap::new().with_display("😴 The market dozes off");
            triggers.time_freeze = Some(CALM_MULTIPLIER);
            triggers
        }
        ChaosKind::Spotlight => {
            let lucky = symbols.choose(rng)?;
            TriggerMap::new()
                .with_delta(lucky.as_str(), 0.10)
                .with_display(format!("🔦 Spotlight on {}", lucky))
        }
        ChaosKind::Tailwind => {
            let mut triggers = TriggerMap::new().with_display("🍃 A light tailwind lifts everything");
            for symbol in symbols {
                triggers.add(symbol.as_str(), 0.02);
            }
            triggers
        }
    };
    Some(triggers)
}
