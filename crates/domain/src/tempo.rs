use serde::{Deserialize, Serialize};

use crate::{note::NoteRecord, DomainError};

/// Floor applied to every runtime BPM value.
pub const MIN_BPM: f32 = 1.0;
/// Ceiling applied to every runtime BPM value.
pub const MAX_BPM: f32 = 1000.0;
/// Seconds a note takes to cross the board at the original tempo.
pub const DEFAULT_TRAVEL_TIME: f64 = 3.0;

pub fn seconds_per_beat(bpm: f32) -> f64 {
    60.0 / sanitize_bpm(bpm) as f64
}

/// Clamps into `MIN_BPM..=MAX_BPM`. NaN and negative infinity land on the
/// floor, positive infinity on the ceiling.
pub fn sanitize_bpm(bpm: f32) -> f32 {
    if bpm.is_nan() {
        MIN_BPM
    } else {
        bpm.clamp(MIN_BPM, MAX_BPM)
    }
}

/// Range accepted for the tempo a song is authored in.
pub fn validate_song_bpm(bpm: f32) -> Result<f32, DomainError> {
    if !(10.0..=400.0).contains(&bpm) {
        return Err(DomainError::validation(
            "song bpm must be between 10 and 400",
        ));
    }
    Ok(bpm)
}

/// Snapshot of the session tempo. Derived fields are only ever computed
/// together, so a `TempoState` is always internally consistent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TempoState {
    original_bpm: f32,
    current_bpm: f32,
    seconds_per_beat: f64,
    note_travel_time: f64,
}

impl TempoState {
    pub fn new(original_bpm: f32, base_travel_time: f64) -> Self {
        let original = sanitize_bpm(original_bpm);
        Self::derive(original, original, base_travel_time)
    }

    pub fn derive(original_bpm: f32, current_bpm: f32, base_travel_time: f64) -> Self {
        let original_bpm = sanitize_bpm(original_bpm);
        let current_bpm = sanitize_bpm(current_bpm);
        let multiplier = current_bpm as f64 / original_bpm as f64;
        Self {
            original_bpm,
            current_bpm,
            seconds_per_beat: seconds_per_beat(current_bpm),
            note_travel_time: base_travel_time / multiplier,
        }
    }

    pub fn original_bpm(&self) -> f32 {
        self.original_bpm
    }

    pub fn current_bpm(&self) -> f32 {
        self.current_bpm
    }

    pub fn seconds_per_beat(&self) -> f64 {
        self.seconds_per_beat
    }

    pub fn note_travel_time(&self) -> f64 {
        self.note_travel_time
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.current_bpm as f64 / self.original_bpm as f64
    }
}

impl Default for TempoState {
    fn default() -> Self {
        Self::new(60.0, DEFAULT_TRAVEL_TIME)
    }
}

/// How a note's arrival instant is derived.
///
/// `Absolute` keeps the authored seconds; `Position` re-derives the instant
/// from the sequence position at the current tempo, so the two disagree as
/// soon as the tempo moves away from the original.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimingModel {
    #[default]
    Absolute,
    Position,
}

impl TimingModel {
    pub fn arrival_time(&self, record: &NoteRecord, tempo: &TempoState) -> f64 {
        match self {
            TimingModel::Absolute => record.start_time,
            TimingModel::Position => record.sequence_position as f64 * tempo.seconds_per_beat(),
        }
    }

    /// Instant after which the whole note body has crossed the target.
    pub fn end_time(&self, record: &NoteRecord, tempo: &TempoState) -> f64 {
        self.arrival_time(record, tempo) + record.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn song_bpm_validation() {
        assert!(validate_song_bpm(5.0).is_err());
        assert!(validate_song_bpm(500.0).is_err());
        assert!(validate_song_bpm(120.0).is_ok());
    }

    #[test]
    fn derived_fields_follow_current_bpm() {
        let state = TempoState::derive(60.0, 120.0, DEFAULT_TRAVEL_TIME);
        assert_relative_eq!(state.seconds_per_beat(), 0.5);
        assert_relative_eq!(state.note_travel_time(), 1.5);
        assert_relative_eq!(state.speed_multiplier(), 2.0);
    }

    #[test]
    fn non_positive_bpm_hits_floor() {
        let state = TempoState::derive(60.0, -3.0, DEFAULT_TRAVEL_TIME);
        assert_eq!(state.current_bpm(), MIN_BPM);
        assert_eq!(sanitize_bpm(f32::NAN), MIN_BPM);
        assert_eq!(sanitize_bpm(f32::NEG_INFINITY), MIN_BPM);
    }

    #[test]
    fn huge_bpm_hits_ceiling() {
        assert_eq!(sanitize_bpm(f32::INFINITY), MAX_BPM);
        let state = TempoState::derive(60.0, 1.0e30, DEFAULT_TRAVEL_TIME);
        assert_eq!(state.current_bpm(), MAX_BPM);
        assert_relative_eq!(state.seconds_per_beat(), 0.06);
    }

    #[test]
    fn timing_models_diverge_after_tempo_change() {
        let note = NoteRecord::new("E4", 8, 8.0, 1.0);
        let original = TempoState::new(60.0, DEFAULT_TRAVEL_TIME);
        let faster = TempoState::derive(60.0, 120.0, DEFAULT_TRAVEL_TIME);
        assert_relative_eq!(TimingModel::Absolute.arrival_time(&note, &original), 8.0);
        assert_relative_eq!(TimingModel::Position.arrival_time(&note, &original), 8.0);
        assert_relative_eq!(TimingModel::Absolute.arrival_time(&note, &faster), 8.0);
        assert_relative_eq!(TimingModel::Position.arrival_time(&note, &faster), 4.0);
        assert_relative_eq!(TimingModel::Position.end_time(&note, &faster), 5.0);
    }
}
