use beatline_domain::tempo::sanitize_bpm;
use beatline_domain::{TempoState, DEFAULT_TRAVEL_TIME};
use tracing::info;

/// Old and new BPM of an applied tempo change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BpmUpdate {
    pub old_bpm: f32,
    pub new_bpm: f32,
}

impl BpmUpdate {
    pub fn changed(&self) -> bool {
        self.old_bpm != self.new_bpm
    }
}

/// Single writer of the session tempo. Every change replaces the whole
/// [`TempoState`], so readers never see a BPM paired with a stale travel time.
#[derive(Clone, Debug)]
pub struct TempoModel {
    state: TempoState,
    base_travel_time: f64,
}

impl TempoModel {
    pub fn new(original_bpm: f32, base_travel_time: f64) -> Self {
        Self {
            state: TempoState::new(original_bpm, base_travel_time),
            base_travel_time,
        }
    }

    /// Replaces the original tempo and drops any runtime change.
    pub fn load(&mut self, original_bpm: f32) {
        self.state = TempoState::new(original_bpm, self.base_travel_time);
    }

    pub fn state(&self) -> &TempoState {
        &self.state
    }

    pub fn original_bpm(&self) -> f32 {
        self.state.original_bpm()
    }

    pub fn current_bpm(&self) -> f32 {
        self.state.current_bpm()
    }

    pub fn seconds_per_beat(&self) -> f64 {
        self.state.seconds_per_beat()
    }

    pub fn note_travel_time(&self) -> f64 {
        self.state.note_travel_time()
    }

    pub fn base_travel_time(&self) -> f64 {
        self.base_travel_time
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.state.speed_multiplier()
    }

    /// Applies `bpm`, capped at `max_bpm` when one is given.
    pub fn set_bpm(&mut self, bpm: f32, max_bpm: Option<f32>) -> BpmUpdate {
        let capped = match max_bpm {
            Some(max) if max > 0.0 && bpm > max => max,
            _ => bpm,
        };
        let old_bpm = self.state.current_bpm();
        self.state = TempoState::derive(
            self.state.original_bpm(),
            sanitize_bpm(capped),
            self.base_travel_time,
        );
        let update = BpmUpdate {
            old_bpm,
            new_bpm: self.state.current_bpm(),
        };
        if update.changed() {
            info!(
                old_bpm,
                new_bpm = update.new_bpm,
                travel = self.state.note_travel_time(),
                "bpm changed"
            );
        }
        update
    }

    pub fn reset_bpm(&mut self) -> BpmUpdate {
        let original = self.state.original_bpm();
        self.set_bpm(original, None)
    }
}

impl Default for TempoModel {
    fn default() -> Self {
        Self::new(60.0, DEFAULT_TRAVEL_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn doubling_tempo_halves_beat_and_travel() {
        let mut tempo = TempoModel::new(60.0, 3.0);
        assert_relative_eq!(tempo.seconds_per_beat(), 1.0);
        assert_relative_eq!(tempo.note_travel_time(), 3.0);
        let update = tempo.set_bpm(120.0, None);
        assert_eq!(update.old_bpm, 60.0);
        assert_eq!(update.new_bpm, 120.0);
        assert_relative_eq!(tempo.seconds_per_beat(), 0.5);
        assert_relative_eq!(tempo.note_travel_time(), 1.5);
        assert_relative_eq!(tempo.speed_multiplier(), 2.0);
    }

    #[test]
    fn reset_restores_original() {
        let mut tempo = TempoModel::new(90.0, 3.0);
        tempo.set_bpm(137.5, None);
        tempo.reset_bpm();
        assert_eq!(tempo.current_bpm(), 90.0);
        assert_relative_eq!(tempo.note_travel_time(), 3.0);
        assert_relative_eq!(tempo.seconds_per_beat(), 60.0 / 90.0);
    }

    #[test]
    fn ceiling_and_floor() {
        let mut tempo = TempoModel::new(60.0, 3.0);
        assert_eq!(tempo.set_bpm(200.0, Some(150.0)).new_bpm, 150.0);
        assert_eq!(tempo.set_bpm(200.0, Some(0.0)).new_bpm, 200.0);
        let update = tempo.set_bpm(0.0, None);
        assert!(update.new_bpm > 0.0);
        assert!(tempo.note_travel_time().is_finite());
    }

    #[test]
    fn load_replaces_original() {
        let mut tempo = TempoModel::default();
        tempo.set_bpm(80.0, None);
        tempo.load(120.0);
        assert_eq!(tempo.original_bpm(), 120.0);
        assert_eq!(tempo.current_bpm(), 120.0);
        assert!(!tempo.reset_bpm().changed());
    }
}
