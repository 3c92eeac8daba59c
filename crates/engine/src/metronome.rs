use beatline_domain::{MetronomeSettings, TempoState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Beats a single tick may fire before skipping ahead of the clock.
const MAX_CATCH_UP_BEATS: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetronomeStatus {
    Stopped,
    Running,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub index: u64,
    pub scheduled_at: f64,
    /// False while muted; the beat still advances the phase.
    pub audible: bool,
}

/// Beat clock locked to the session tempo.
#[derive(Clone, Debug)]
pub struct Metronome {
    status: MetronomeStatus,
    bpm: f32,
    seconds_per_beat: f64,
    next_beat_deadline: f64,
    beat_counter: u64,
    last_beat_at: Option<f64>,
    muted: bool,
    snap_threshold: f64,
}

impl Metronome {
    pub fn new(settings: &MetronomeSettings, tempo: &TempoState) -> Self {
        Self {
            status: MetronomeStatus::Stopped,
            bpm: tempo.current_bpm(),
            seconds_per_beat: tempo.seconds_per_beat(),
            next_beat_deadline: 0.0,
            beat_counter: 0,
            last_beat_at: None,
            muted: false,
            snap_threshold: settings.snap_threshold,
        }
    }

    pub fn status(&self) -> MetronomeStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == MetronomeStatus::Running
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn beat_counter(&self) -> u64 {
        self.beat_counter
    }

    pub fn next_beat_deadline(&self) -> f64 {
        self.next_beat_deadline
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Anchors the first beat on the next whole second at or after `clock`.
    pub fn start(&mut self, clock: f64) {
        self.status = MetronomeStatus::Running;
        self.next_beat_deadline = clock.max(0.0).ceil();
        self.beat_counter = 0;
        self.last_beat_at = None;
        debug!(clock, deadline = self.next_beat_deadline, "metronome started");
    }

    /// Starts on the beat grid of `clock` rather than the next whole second.
    /// The beat counter becomes the grid index of the first beat.
    pub fn start_on_grid(&mut self, clock: f64) {
        self.status = MetronomeStatus::Running;
        self.sync_to_clock(clock);
        debug!(clock, deadline = self.next_beat_deadline, "metronome started on grid");
    }

    pub fn stop(&mut self) {
        self.status = MetronomeStatus::Stopped;
    }

    /// Back to a freshly constructed state at the given tempo.
    pub fn reset(&mut self, tempo: &TempoState) {
        self.status = MetronomeStatus::Stopped;
        self.bpm = tempo.current_bpm();
        self.seconds_per_beat = tempo.seconds_per_beat();
        self.next_beat_deadline = 0.0;
        self.beat_counter = 0;
        self.last_beat_at = None;
        self.muted = false;
    }

    pub fn mute(&mut self) {
        self.muted = true;
    }

    pub fn unmute(&mut self) {
        self.muted = false;
    }

    /// Fires every beat whose deadline `clock` has reached. After a long stall
    /// at most [`MAX_CATCH_UP_BEATS`] fire and the rest are skipped.
    pub fn tick(&mut self, clock: f64, tempo: &TempoState, out: &mut Vec<BeatEvent>) {
        if !self.is_running() {
            return;
        }
        self.bpm = tempo.current_bpm();
        self.seconds_per_beat = tempo.seconds_per_beat();
        let mut fired = 0;
        while clock >= self.next_beat_deadline {
            if fired == MAX_CATCH_UP_BEATS {
                let skipped = ((clock - self.next_beat_deadline) / self.seconds_per_beat).floor();
                self.beat_counter += skipped as u64 + 1;
                self.next_beat_deadline = clock + self.seconds_per_beat;
                warn!(clock, skipped, "metronome fell behind, skipping beats");
                break;
            }
            fired += 1;
            let beat = BeatEvent {
                index: self.beat_counter,
                scheduled_at: self.next_beat_deadline,
                audible: !self.muted,
            };
            out.push(beat);
            self.last_beat_at = Some(self.next_beat_deadline);
            self.beat_counter += 1;
            self.next_beat_deadline += self.seconds_per_beat;
        }
    }

    /// Re-reads the tempo and moves the pending deadline so the current beat's
    /// progress is preserved. Never schedules behind `clock`.
    pub fn sync_from_tempo(&mut self, clock: f64, tempo: &TempoState) {
        let old_spb = self.seconds_per_beat;
        let new_spb = tempo.seconds_per_beat();
        self.bpm = tempo.current_bpm();
        self.seconds_per_beat = new_spb;
        if !self.is_running() {
            return;
        }

        let remaining = (self.next_beat_deadline - clock).max(0.0);
        let mut next = clock + remaining / old_spb * new_spb;
        if let Some(last) = self.last_beat_at {
            next = next.max(last + new_spb);
            if next - clock < self.snap_threshold && clock - last < self.snap_threshold {
                next = clock + self.snap_threshold;
            }
        }
        self.next_beat_deadline = next.max(clock);
        debug!(bpm = self.bpm, deadline = self.next_beat_deadline, "metronome re-anchored");
    }

    /// Hard re-anchor onto the beat grid of `clock`: the next beat lands on the
    /// first grid point at or after it.
    pub fn sync_to_clock(&mut self, clock: f64) {
        if !self.is_running() {
            return;
        }
        let spb = self.seconds_per_beat;
        let beats = (clock.max(0.0) / spb - 1e-9).ceil().max(0.0);
        self.beat_counter = beats as u64;
        self.next_beat_deadline = beats * spb;
        self.last_beat_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempo::TempoModel;
    use approx::assert_relative_eq;

    fn metronome(tempo: &TempoModel) -> Metronome {
        Metronome::new(&MetronomeSettings::default(), tempo.state())
    }

    #[test]
    fn start_anchors_on_next_whole_second() {
        let tempo = TempoModel::new(60.0, 3.0);
        let mut metro = metronome(&tempo);
        metro.start(0.3);
        assert_relative_eq!(metro.next_beat_deadline(), 1.0);
        let mut beats = Vec::new();
        metro.tick(3.0, tempo.state(), &mut beats);
        let times: Vec<f64> = beats.iter().map(|b| b.scheduled_at).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
        assert_eq!(metro.beat_counter(), 3);
    }

    #[test]
    fn ramp_never_crowds_beats_or_falls_behind() {
        let mut tempo = TempoModel::new(60.0, 3.0);
        let mut metro = metronome(&tempo);
        metro.start(0.0);
        let mut beats = Vec::new();
        let mut fired_spb = Vec::new();
        let dt = 1.0 / 120.0;
        for frame in 0..2400 {
            let clock = frame as f64 * dt;
            if frame % 12 == 0 && frame > 0 {
                let bpm = 60.0 + (frame / 12) as f32;
                tempo.set_bpm(bpm, None);
                metro.sync_from_tempo(clock, tempo.state());
                assert!(metro.next_beat_deadline() >= clock);
            }
            let before = beats.len();
            metro.tick(clock, tempo.state(), &mut beats);
            for _ in before..beats.len() {
                fired_spb.push(tempo.seconds_per_beat());
            }
            assert!(metro.next_beat_deadline() >= clock);
        }
        assert!(beats.len() > 30);
        for (pair, spb) in beats.windows(2).zip(fired_spb.iter().skip(1)) {
            assert!(pair[1].scheduled_at - pair[0].scheduled_at >= spb - 0.02);
        }
    }

    #[test]
    fn snap_pushes_deadline_forward() {
        let mut tempo = TempoModel::new(60.0, 3.0);
        let mut metro = metronome(&tempo);
        metro.start(0.0);
        let mut beats = Vec::new();
        metro.tick(1.0, tempo.state(), &mut beats);
        assert_eq!(beats.len(), 2);
        tempo.set_bpm(1000.0, None);
        metro.sync_from_tempo(1.02, tempo.state());
        assert_relative_eq!(metro.next_beat_deadline(), 1.12, epsilon = 1e-9);
    }

    #[test]
    fn long_stall_fires_bounded_beats() {
        let tempo = TempoModel::new(60.0, 3.0);
        let mut metro = metronome(&tempo);
        metro.start(0.0);
        let mut beats = Vec::new();
        metro.tick(100.5, tempo.state(), &mut beats);
        assert_eq!(beats.len(), MAX_CATCH_UP_BEATS as usize);
        assert!(metro.next_beat_deadline() > 100.5);
        assert_eq!(metro.beat_counter(), 101);
        beats.clear();
        metro.tick(101.5, tempo.state(), &mut beats);
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].index, 101);
    }

    #[test]
    fn start_on_grid_counts_from_grid_index() {
        let tempo = TempoModel::new(120.0, 3.0);
        let mut metro = metronome(&tempo);
        metro.start_on_grid(2.2);
        assert!(metro.is_running());
        assert_relative_eq!(metro.next_beat_deadline(), 2.5);
        assert_eq!(metro.beat_counter(), 5);
        let mut beats = Vec::new();
        metro.tick(3.0, tempo.state(), &mut beats);
        let indices: Vec<u64> = beats.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![5, 6]);
    }

    #[test]
    fn sync_to_clock_lands_on_grid() {
        let tempo = TempoModel::new(120.0, 3.0);
        let mut metro = metronome(&tempo);
        metro.start(0.0);
        metro.sync_to_clock(7.2);
        assert_relative_eq!(metro.next_beat_deadline(), 7.5);
        assert_eq!(metro.beat_counter(), 15);
        metro.sync_to_clock(8.0);
        assert_relative_eq!(metro.next_beat_deadline(), 8.0);
    }

    #[test]
    fn mute_keeps_phase() {
        let tempo = TempoModel::new(60.0, 3.0);
        let mut metro = metronome(&tempo);
        metro.start(0.0);
        metro.mute();
        let mut beats = Vec::new();
        metro.tick(1.5, tempo.state(), &mut beats);
        metro.unmute();
        metro.tick(2.0, tempo.state(), &mut beats);
        let audible: Vec<bool> = beats.iter().map(|b| b.audible).collect();
        assert_eq!(audible, vec![false, false, true]);
    }

    #[test]
    fn reset_stops_and_zeroes() {
        let tempo = TempoModel::new(60.0, 3.0);
        let mut metro = metronome(&tempo);
        metro.start(0.0);
        let mut beats = Vec::new();
        metro.tick(4.0, tempo.state(), &mut beats);
        metro.reset(tempo.state());
        assert_eq!(metro.status(), MetronomeStatus::Stopped);
        assert_eq!(metro.beat_counter(), 0);
        beats.clear();
        metro.tick(10.0, tempo.state(), &mut beats);
        assert!(beats.is_empty());
    }
}
