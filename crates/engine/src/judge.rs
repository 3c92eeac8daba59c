use beatline_domain::{
    CandidateScope, NoteRef, TempoState, TimingDirection, TimingModel, TimingSettings,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scheduler::NoteScheduler;

/// The key or lane label a press came from. Releases are matched on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputSource(String);

impl InputSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

/// Outcome of a press. An unmatched press carries no note and zero accuracy.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MatchResult {
    pub note: Option<NoteRef>,
    pub accuracy: f32,
    /// Press time minus arrival time, seconds.
    pub offset: f64,
}

impl MatchResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        self.note.is_some()
    }

    pub fn direction(&self) -> Option<TimingDirection> {
        self.note
            .as_ref()
            .map(|_| TimingDirection::from_offset(self.offset))
    }
}

/// `1 - diff / window`, clamped to `[0, 1]`.
pub fn accuracy(diff: f64, window: f64) -> f32 {
    if window <= 0.0 {
        return if diff <= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - diff.abs() / window).clamp(0.0, 1.0) as f32
}

#[derive(Clone, Debug)]
pub struct HitJudge {
    hit_window: f64,
    scope: CandidateScope,
}

impl HitJudge {
    pub fn new(settings: &TimingSettings) -> Self {
        Self {
            hit_window: settings.hit_window,
            scope: settings.candidate_scope,
        }
    }

    pub fn hit_window(&self) -> f64 {
        self.hit_window
    }

    /// The hit window as a fraction of the on-screen travel, for renderers.
    pub fn window_span(&self, tempo: &TempoState) -> f64 {
        self.hit_window / tempo.note_travel_time()
    }

    /// Matches a press against the closest eligible note in its lane and marks it hit.
    pub fn on_press(
        &self,
        scheduler: &mut NoteScheduler,
        tempo: &TempoState,
        model: TimingModel,
        source: &InputSource,
        clock: f64,
    ) -> MatchResult {
        let best = scheduler
            .candidates(self.scope)
            .into_iter()
            .filter(|record| record.matches_lane(source.label()))
            .map(|record| {
                let offset = clock - model.arrival_time(record, tempo);
                (record.sequence_position, offset)
            })
            .filter(|(_, offset)| offset.abs() <= self.hit_window)
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()));

        let Some((position, offset)) = best else {
            debug!(lane = source.label(), clock, "press matched nothing");
            return MatchResult::none();
        };
        let Some(note) = scheduler.mark_hit(position, source.clone()) else {
            return MatchResult::none();
        };
        let accuracy = accuracy(offset, self.hit_window);
        debug!(position, pitch = %note.pitch, accuracy, offset, "note hit");
        MatchResult {
            note: Some(note),
            accuracy,
            offset,
        }
    }

    pub fn on_release(
        &self,
        scheduler: &mut NoteScheduler,
        source: &InputSource,
    ) -> Option<NoteRef> {
        scheduler.release(source)
    }
}
