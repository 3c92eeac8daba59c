use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{error::DomainError, song::Song, tempo::TimingModel};

/// Which notes the judge may consider for a press.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateScope {
    /// Only notes that currently have an active instance.
    #[default]
    ActiveOnly,
    /// Every loaded record, spawned or not.
    AllRecords,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    pub base_travel_time: f64,
    pub spawn_offset: f64,
    pub arrival_offset: f64,
    pub hit_window: f64,
    pub cleanup_delay: f64,
    pub preview_horizon: f64,
    pub candidate_scope: CandidateScope,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            base_travel_time: 3.0,
            spawn_offset: 3.0,
            arrival_offset: 0.0,
            hit_window: 0.2,
            cleanup_delay: 4.0,
            preview_horizon: 5.0,
            candidate_scope: CandidateScope::ActiveOnly,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformSettings {
    pub timing_model: TimingModel,
    /// Consecutive hits before the muted metronome comes back.
    pub unmute_threshold: u32,
    pub spawn_offset: f64,
}

impl Default for PerformSettings {
    fn default() -> Self {
        Self {
            timing_model: TimingModel::Absolute,
            unmute_threshold: 3,
            spawn_offset: 3.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeedUpSettings {
    pub timing_model: TimingModel,
    pub spawn_offset: f64,
    pub pattern_length: u32,
    pub bpm_increase: f32,
    /// Zero or below means no ceiling.
    pub max_bpm: f32,
    pub ramp_duration: f64,
    pub ramp_steps: u32,
    /// Overrides the song's own pattern starts when present.
    pub pattern_boundaries: Option<Vec<u32>>,
}

impl Default for SpeedUpSettings {
    fn default() -> Self {
        Self {
            timing_model: TimingModel::Position,
            spawn_offset: 10.0,
            pattern_length: 6,
            bpm_increase: 10.0,
            max_bpm: 0.0,
            ramp_duration: 1.0,
            ramp_steps: 10,
            pattern_boundaries: None,
        }
    }
}

impl SpeedUpSettings {
    pub fn max_bpm(&self) -> Option<f32> {
        (self.max_bpm > 0.0).then_some(self.max_bpm)
    }

    pub fn boundaries_for(&self, song: &Song) -> Vec<u32> {
        self.pattern_boundaries
            .clone()
            .unwrap_or_else(|| song.pattern_starts.clone())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetronomeSettings {
    /// A re-anchored deadline closer than this to both the clock and the last
    /// beat is pushed out to `clock + snap_threshold`.
    pub snap_threshold: f64,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            snap_threshold: 0.1,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainerSettings {
    pub timing: TimingSettings,
    pub perform: PerformSettings,
    pub speed_up: SpeedUpSettings,
    pub metronome: MetronomeSettings,
}

impl TrainerSettings {
    pub fn from_yaml_str(source: &str) -> Result<Self, DomainError> {
        let mut settings: Self = serde_yaml::from_str(source)?;
        settings.validate();
        Ok(settings)
    }

    pub fn from_json_str(source: &str) -> Result<Self, DomainError> {
        let mut settings: Self = serde_json::from_str(source)?;
        settings.validate();
        Ok(settings)
    }

    #[instrument]
    pub fn load(path: &Path) -> Result<Self, DomainError> {
        let source = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let settings = if is_json {
            Self::from_json_str(&source)?
        } else {
            Self::from_yaml_str(&source)?
        };
        debug!(?settings, "loaded trainer settings");
        Ok(settings)
    }

    /// Clamps every value into a usable range.
    pub fn validate(&mut self) {
        let timing = &mut self.timing;
        timing.base_travel_time = clamp_min(timing.base_travel_time, 0.1);
        timing.spawn_offset = clamp_min(timing.spawn_offset, 0.0);
        timing.hit_window = clamp_min(timing.hit_window, 0.05);
        timing.cleanup_delay = clamp_min(timing.cleanup_delay, 0.1);
        timing.preview_horizon = clamp_min(timing.preview_horizon, 0.0);
        if !timing.arrival_offset.is_finite() {
            timing.arrival_offset = 0.0;
        }

        self.perform.spawn_offset = clamp_min(self.perform.spawn_offset, 0.0);
        self.perform.unmute_threshold = self.perform.unmute_threshold.max(1);

        let speed_up = &mut self.speed_up;
        speed_up.spawn_offset = clamp_min(speed_up.spawn_offset, 0.0);
        speed_up.pattern_length = speed_up.pattern_length.max(1);
        speed_up.ramp_steps = speed_up.ramp_steps.max(1);
        speed_up.ramp_duration = clamp_min(speed_up.ramp_duration, 0.0);
        if !speed_up.bpm_increase.is_finite() || speed_up.bpm_increase < 0.0 {
            speed_up.bpm_increase = 0.0;
        }
        if !speed_up.max_bpm.is_finite() {
            speed_up.max_bpm = 0.0;
        }

        self.metronome.snap_threshold = clamp_min(self.metronome.snap_threshold, 0.0);
    }
}

fn clamp_min(value: f64, min: f64) -> f64 {
    if value.is_finite() {
        value.max(min)
    } else {
        min
    }
}
