use beatline_domain::{AnalyticsEvent, DomainError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

/// Write-only consumer of gameplay facts.
pub trait AnalyticsSink {
    fn session_started(&mut self, _song_title: &str, _bpm: f32) {}
    fn record(&mut self, event: &AnalyticsEvent);
    fn session_ended(&mut self, _clock: f64) {}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub total_hits: u32,
    pub total_misses: u32,
    pub average_accuracy: f32,
    pub best_accuracy: f32,
    pub worst_accuracy: f32,
    pub consecutive_hits: u32,
    pub max_consecutive_hits: u32,
    pub consecutive_misses: u32,
    pub max_consecutive_misses: u32,
    pub patterns_completed: u32,
    pub initial_bpm: f32,
    pub final_bpm: f32,
}

impl SessionStats {
    fn apply(&mut self, event: &AnalyticsEvent) {
        match event {
            AnalyticsEvent::NoteHit { accuracy, .. } => {
                let previous = self.total_hits as f32;
                self.total_hits += 1;
                self.average_accuracy =
                    (self.average_accuracy * previous + accuracy) / self.total_hits as f32;
                if self.total_hits == 1 {
                    self.best_accuracy = *accuracy;
                    self.worst_accuracy = *accuracy;
                } else {
                    self.best_accuracy = self.best_accuracy.max(*accuracy);
                    self.worst_accuracy = self.worst_accuracy.min(*accuracy);
                }
                self.consecutive_hits += 1;
                self.consecutive_misses = 0;
                self.max_consecutive_hits = self.max_consecutive_hits.max(self.consecutive_hits);
            }
            AnalyticsEvent::NoteMiss { .. } => {
                self.total_misses += 1;
                self.consecutive_misses += 1;
                self.consecutive_hits = 0;
                self.max_consecutive_misses =
                    self.max_consecutive_misses.max(self.consecutive_misses);
            }
            AnalyticsEvent::BpmChange { new_bpm, .. } => self.final_bpm = *new_bpm,
            AnalyticsEvent::PatternComplete { .. } => self.patterns_completed += 1,
            AnalyticsEvent::NoteRelease { .. } => {}
        }
    }
}

/// In-memory record of one session, exportable as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionLog {
    pub song_title: String,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at_clock: Option<f64>,
    pub events: Vec<AnalyticsEvent>,
    pub stats: SessionStats,
    #[serde(skip)]
    fixed_start: Option<OffsetDateTime>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps every session with `started_at` instead of reading the system clock.
    pub fn with_start(started_at: OffsetDateTime) -> Self {
        Self {
            fixed_start: Some(started_at),
            ..Self::default()
        }
    }

    pub fn bpm_changes(&self) -> impl Iterator<Item = &AnalyticsEvent> {
        self.events
            .iter()
            .filter(|event| matches!(event, AnalyticsEvent::BpmChange { .. }))
    }

    pub fn to_json(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn summary(&self) -> String {
        let stats = &self.stats;
        format!(
            "{}: {} hits, {} misses, avg accuracy {:.0}%, best streak {}, {} patterns, bpm {:.0} -> {:.0}",
            if self.song_title.is_empty() { "untitled" } else { self.song_title.as_str() },
            stats.total_hits,
            stats.total_misses,
            stats.average_accuracy * 100.0,
            stats.max_consecutive_hits,
            stats.patterns_completed,
            stats.initial_bpm,
            stats.final_bpm,
        )
    }
}

impl AnalyticsSink for SessionLog {
    fn session_started(&mut self, song_title: &str, bpm: f32) {
        let fixed_start = self.fixed_start;
        *self = Self {
            song_title: song_title.to_string(),
            started_at: Some(fixed_start.unwrap_or_else(OffsetDateTime::now_utc)),
            fixed_start,
            ..Self::default()
        };
        self.stats.initial_bpm = bpm;
        self.stats.final_bpm = bpm;
    }

    fn record(&mut self, event: &AnalyticsEvent) {
        self.stats.apply(event);
        self.events.push(event.clone());
    }

    fn session_ended(&mut self, clock: f64) {
        self.ended_at_clock = Some(clock);
        debug!(summary = %self.summary(), "session log closed");
    }
}
