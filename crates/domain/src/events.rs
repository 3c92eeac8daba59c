use serde::{Deserialize, Serialize};

use crate::note::NoteRecord;

/// Identity of a note as reported to event consumers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NoteRef {
    pub pitch: String,
    pub sequence_position: u32,
    pub start_time: f64,
    pub is_rest: bool,
}

impl From<&NoteRecord> for NoteRef {
    fn from(record: &NoteRecord) -> Self {
        Self {
            pitch: record.pitch.clone(),
            sequence_position: record.sequence_position,
            start_time: record.start_time,
            is_rest: record.is_rest,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BpmChangeReason {
    Manual,
    SpeedUp,
    Reset,
}

/// Discrete gameplay facts handed to analytics sinks. Timestamps are session
/// clock seconds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    NoteHit {
        note: NoteRef,
        accuracy: f32,
        timestamp: f64,
    },
    NoteMiss {
        note: NoteRef,
        timestamp: f64,
    },
    NoteRelease {
        note: NoteRef,
        timestamp: f64,
    },
    BpmChange {
        old_bpm: f32,
        new_bpm: f32,
        reason: BpmChangeReason,
        timestamp: f64,
    },
    PatternComplete {
        note: Option<NoteRef>,
        timestamp: f64,
    },
}

impl AnalyticsEvent {
    pub fn timestamp(&self) -> f64 {
        match self {
            AnalyticsEvent::NoteHit { timestamp, .. }
            | AnalyticsEvent::NoteMiss { timestamp, .. }
            | AnalyticsEvent::NoteRelease { timestamp, .. }
            | AnalyticsEvent::BpmChange { timestamp, .. }
            | AnalyticsEvent::PatternComplete { timestamp, .. } => *timestamp,
        }
    }

    pub fn note(&self) -> Option<&NoteRef> {
        match self {
            AnalyticsEvent::NoteHit { note, .. }
            | AnalyticsEvent::NoteMiss { note, .. }
            | AnalyticsEvent::NoteRelease { note, .. } => Some(note),
            AnalyticsEvent::PatternComplete { note, .. } => note.as_ref(),
            AnalyticsEvent::BpmChange { .. } => None,
        }
    }

    pub fn accuracy(&self) -> Option<f32> {
        match self {
            AnalyticsEvent::NoteHit { accuracy, .. } => Some(*accuracy),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Preparing,
    Playing,
    End,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub clock: f64,
}

/// Which side of the target a press landed on.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimingDirection {
    Early,
    Exact,
    Late,
}

impl TimingDirection {
    const EXACT_THRESHOLD: f64 = 0.001;

    /// `offset` is `press_time - arrival_time` in seconds.
    pub fn from_offset(offset: f64) -> Self {
        if offset < -Self::EXACT_THRESHOLD {
            TimingDirection::Early
        } else if offset > Self::EXACT_THRESHOLD {
            TimingDirection::Late
        } else {
            TimingDirection::Exact
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_offset() {
        assert_eq!(TimingDirection::from_offset(-0.05), TimingDirection::Early);
        assert_eq!(TimingDirection::from_offset(0.0004), TimingDirection::Exact);
        assert_eq!(TimingDirection::from_offset(0.02), TimingDirection::Late);
    }

    #[test]
    fn analytics_event_accessors() {
        let record = NoteRecord::new("G4", 7, 3.5, 0.5);
        let hit = AnalyticsEvent::NoteHit {
            note: NoteRef::from(&record),
            accuracy: 0.8,
            timestamp: 3.52,
        };
        assert_eq!(hit.timestamp(), 3.52);
        assert_eq!(hit.accuracy(), Some(0.8));
        assert_eq!(hit.note().map(|n| n.sequence_position), Some(7));

        let change = AnalyticsEvent::BpmChange {
            old_bpm: 60.0,
            new_bpm: 70.0,
            reason: BpmChangeReason::SpeedUp,
            timestamp: 9.0,
        };
        assert!(change.note().is_none());
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"event\":\"bpm_change\""));
    }
}
