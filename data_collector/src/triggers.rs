//! Chat activity trigger detection
//! Scans recent messages for keyword classes and turns hits into price bonuses

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc, Weekday};
use regex::Regex;
use shared::{ChatMessage, TriggerMap};
use tracing::debug;

/// When a keyword class is allowed to fire.
#[derive(Debug, Clone)]
pub enum TimeGate {
    Always,
    /// Active only between `start` (inclusive) and `end` (exclusive), wrapping midnight.
    Hours { start: u32, end: u32 },
    /// Active only on the listed weekdays.
    Weekdays(&'static [Weekday]),
    /// Always active, effects multiplied by `factor` inside the hour window.
    Amplified { start: u32, end: u32, factor: f64 },
}

impl TimeGate {
    /// Multiplier for the class effects at `local`, or `None` when gated off.
    fn multiplier(&self, local: &DateTime<FixedOffset>) -> Option<f64> {
        match self {
            TimeGate::Always => Some(1.0),
            TimeGate::Hours { start, end } => {
                in_hour_window(local.hour(), *start, *end).then_some(1.0)
            }
            TimeGate::Weekdays(days) => days.contains(&local.weekday()).then_some(1.0),
            TimeGate::Amplified { start, end, factor } => {
                if in_hour_window(local.hour(), *start, *end) {
                    Some(*factor)
                } else {
                    Some(1.0)
                }
            }
        }
    }
}

pub fn in_hour_window(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

pub struct KeywordClass {
    pub name: &'static str,
    pattern: Regex,
    /// Hits needed before the class fires.
    pub threshold: usize,
    pub effects: Vec<(&'static str, f64)>,
    pub gate: TimeGate,
    pub description: &'static str,
}

impl KeywordClass {
    pub fn new(
        name: &'static str,
        keywords: &[&str],
        threshold: usize,
        effects: Vec<(&'static str, f64)>,
        gate: TimeGate,
        description: &'static str,
    ) -> Result<Self> {
        let alternatives: Vec<String> = keywords.iter().map(|k| regex::escape(k)).collect();
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?;
        Ok(Self {
            name,
            pattern,
            threshold: threshold.max(1),
            effects,
            gate,
            description,
        })
    }

    fn count_hits(&self, messages: &[&ChatMessage]) -> usize {
        messages
            .iter()
            .map(|m| self.pattern.find_iter(&m.text).count())
            .sum()
    }
}

pub struct TriggerDetector {
    classes: Vec<KeywordClass>,
    window_len: usize,
    max_age: Duration,
    offset: FixedOffset,
}

impl TriggerDetector {
    pub fn new(classes: Vec<KeywordClass>, offset: FixedOffset) -> Self {
        Self {
            classes,
            window_len: 50,
            max_age: Duration::minutes(30),
            offset,
        }
    }

    /// Detector with the built-in keyword classes.
    pub fn with_default_classes(offset: FixedOffset) -> Result<Self> {
        Ok(Self::new(default_classes()?, offset))
    }

    pub fn with_window(mut self, window_len: usize, max_age: Duration) -> Self {
        self.window_len = window_len;
        self.max_age = max_age;
        self
    }

    /// Build this cycle's trigger map from recent activity.
    ///
    /// Only the most recent `window_len` messages younger than `max_age`
    /// are scanned. The display text holds the last class that fired.
    pub fn detect(&self, messages: &[ChatMessage], now: DateTime<Utc>) -> TriggerMap {
        let cutoff = now - self.max_age;
        let start = messages.len().saturating_sub(self.window_len);
        let window: Vec<&ChatMessage> = messages[start..]
            .iter()
            .filter(|m| m.timestamp >= cutoff && m.timestamp <= now)
            .collect();

        let mut triggers = TriggerMap::new();
        if window.is_empty() {
            return triggers;
        }

        let local = now.with_timezone(&self.offset);
        for class in &self.classes {
            let Some(multiplier) = class.gate.multiplier(&local) else {
                continue;
            };
            let hits = class.count_hits(&window);
            if hits < class.threshold {
                continue;
            }
            debug!("💬 {} matched {} times (x{:.1})", class.name, hits, multiplier);
            for (symbol, bonus) in &class.effects {
                triggers.add(*symbol, bonus * multiplier);
            }
            triggers.display = Some(class.description.to_string());
        }
        triggers
    }
}

fn default_classes() -> Result<Vec<KeywordClass>> {
    use TimeGate::*;
    Ok(vec![
        KeywordClass::new(
            "romance",
            &["love", "crush", "date", "kiss", "heart", "valentine"],
            2,
            vec![("LOVE", 0.06)],
            Always,
            "💘 Love is in the air, LOVE is climbing",
        )?,
        KeywordClass::new(
            "food",
            &["pizza", "burger", "hungry", "snack", "lunch", "dinner"],
            2,
            vec![("PIZZA", 0.05), ("COFFEE", 0.01)],
            Amplified { start: 11, end: 14, factor: 2.0 },
            "🍕 Everyone is hungry, PIZZA demand rising",
        )?,
        KeywordClass::new(
            "coffee",
            &["coffee", "espresso", "latte", "caffeine"],
            1,
            vec![("COFFEE", 0.04)],
            Hours { start: 6, end: 11 },
            "☕ Morning coffee rush",
        )?,
        KeywordClass::new(
            "panic",
            &["panic", "crash", "dump", "help", "rip", "sell"],
            1,
            vec![("PANIK", 0.10), ("MOON", -0.04), ("HODL", -0.03)],
            Always,
            "😱 Panic in the chat, PANIK soars",
        )?,
        KeywordClass::new(
            "suspicion",
            &["sus", "scam", "rug", "suspicious", "fake"],
            2,
            vec![("PANIK", 0.03), ("HODL", -0.05)],
            Always,
            "🕵️ Something is sus, crypto holders get nervous",
        )?,
        KeywordClass::new(
            "weather",
            &["rain", "storm", "thunder", "snow", "umbrella"],
            1,
            vec![("RAIN", 0.07), ("SUN", -0.03)],
            Always,
            "🌧️ Bad weather talk, RAIN is pouring in",
        )?,
        KeywordClass::new(
            "sunshine",
            &["sun", "sunny", "beach", "heatwave"],
            2,
            vec![("SUN", 0.05), ("RAIN", -0.02)],
            Always,
            "☀️ Sunshine vibes, SUN heats up",
        )?,
        KeywordClass::new(
            "shortage",
            &["shortage", "sold out", "empty shelves", "hoard", "toilet paper"],
            1,
            vec![("TOILET", 0.08)],
            Always,
            "🧻 Shortage rumours, TOILET hoarding begins",
        )?,
        KeywordClass::new(
            "night_owl",
            &["insomnia", "awake", "night", "cant sleep"],
            1,
            vec![("NIGHTOWL", 0.06)],
            Hours { start: 0, end: 5 },
            "🦉 The night owls are awake",
        )?,
        KeywordClass::new(
            "party",
            &["party", "weekend", "drinks", "club"],
            2,
            vec![("FRIDAY", 0.05), ("LOVE", 0.02)],
            Weekdays(&[Weekday::Fri, Weekday::Sat]),
            "🎉 Weekend party mode",
        )?,
        KeywordClass::new(
            "moon",
            &["moon", "rocket", "lambo", "hodl"],
            2,
            vec![("MOON", 0.06), ("HODL", 0.04)],
            Always,
            "🚀 To the moon!",
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Offset, TimeZone};

    fn detector() -> TriggerDetector {
        TriggerDetector::with_default_classes(Utc.fix()).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn msgs(now: DateTime<Utc>, texts: &[&str]) -> Vec<ChatMessage> {
        texts
            .iter()
            .map(|t| ChatMessage::new("anna", *t, now - Duration::minutes(1)))
            .collect()
    }

    #[test]
    fn test_hour_window_wraps_midnight() {
        assert!(in_hour_window(23, 22, 4));
        assert!(in_hour_window(2, 22, 4));
        assert!(!in_hour_window(4, 22, 4));
        assert!(in_hour_window(11, 11, 14));
        assert!(!in_hour_window(14, 11, 14));
    }

    #[test]
    fn test_threshold_two_needs_two_hits() {
        // Tuesday afternoon
        let now = at(2024, 5, 7, 16);
        let one = detector().detect(&msgs(now, &["I have a crush"]), now);
        assert_eq!(one.delta("LOVE"), None);

        let two = detector().detect(&msgs(now, &["I have a crush", "first date tonight"]), now);
        assert_eq!(two.delta("LOVE"), Some(0.06));
        assert!(two.display.unwrap().contains("LOVE"));
    }

    #[test]
    fn test_food_amplified_at_lunch() {
        let lunch = at(2024, 5, 7, 12);
        let evening = at(2024, 5, 7, 19);
        let texts = ["pizza?", "so hungry"];

        let amplified = detector().detect(&msgs(lunch, &texts), lunch);
        let normal = detector().detect(&msgs(evening, &texts), evening);
        assert!((amplified.delta("PIZZA").unwrap() - 0.10).abs() < 1e-12);
        assert!((normal.delta("PIZZA").unwrap() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_time_gated_class_is_silent_outside_window() {
        let morning = at(2024, 5, 7, 8);
        let night = at(2024, 5, 7, 22);
        assert_eq!(detector().detect(&msgs(morning, &["coffee"]), morning).delta("COFFEE"), Some(0.04));
        assert_eq!(detector().detect(&msgs(night, &["coffee"]), night).delta("COFFEE"), None);
    }

    #[test]
    fn test_weekday_gate() {
        // 2024-05-10 is a Friday, 2024-05-08 a Wednesday
        let friday = at(2024, 5, 10, 21);
        let wednesday = at(2024, 5, 8, 21);
        let texts = ["party tonight", "club after"];
        assert_eq!(detector().detect(&msgs(friday, &texts), friday).delta("FRIDAY"), Some(0.05));
        assert_eq!(detector().detect(&msgs(wednesday, &texts), wednesday).delta("FRIDAY"), None);
    }

    #[test]
    fn test_last_matching_class_owns_display_text() {
        let now = at(2024, 5, 7, 16);
        let triggers = detector().detect(&msgs(now, &["panic!", "storm outside"]), now);
        assert_eq!(triggers.delta("PANIK"), Some(0.10));
        assert_eq!(triggers.delta("RAIN"), Some(0.07));
        // weather comes after panic in the class list
        assert!(triggers.display.unwrap().contains("RAIN"));
    }

    #[test]
    fn test_stale_and_out_of_window_messages_ignored() {
        let now = at(2024, 5, 7, 16);
        let mut messages = vec![ChatMessage::new("bob", "panic", now - Duration::hours(2))];
        assert!(detector().detect(&messages, now).is_empty());

        messages.push(ChatMessage::new("bob", "panic", now));
        let narrow = detector().with_window(1, Duration::minutes(30));
        messages.push(ChatMessage::new("bob", "nothing to see", now));
        assert!(narrow.detect(&messages, now).is_empty());
    }

    #[test]
    fn test_word_boundaries() {
        let now = at(2024, 5, 7, 16);
        // "helpful" and "sunday" must not count as "help" / "sun"
        let triggers = detector().detect(&msgs(now, &["very helpful", "sunday sunday"]), now);
        assert!(triggers.is_empty());
    }
}
