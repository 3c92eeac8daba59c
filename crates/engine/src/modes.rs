use beatline_domain::{BpmChangeReason, NoteRef, PerformSettings, SpeedUpSettings, TimingModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::metronome::Metronome;
use crate::tempo::{BpmUpdate, TempoModel};
use crate::timers::{TimerId, TimerQueue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    Perform,
    SpeedUp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeStatus {
    Initialized,
    Running,
    Paused,
    Ended,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerformState {
    pub consecutive_hits: u32,
    pending_unmute: Option<TimerId>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatternState {
    pub pattern_hit_count: u32,
    pub boundaries: Vec<u32>,
    /// Tempo added by completed ramps since the mode started.
    pub accumulated_delta: f32,
    pub patterns_completed: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GameMode {
    Perform(PerformState),
    SpeedUp(PatternState),
}

impl GameMode {
    pub fn kind(&self) -> ModeKind {
        match self {
            GameMode::Perform(_) => ModeKind::Perform,
            GameMode::SpeedUp(_) => ModeKind::SpeedUp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ModeTask {
    UnmuteMetronome,
    BeginRamp,
    RampStep {
        from: f32,
        to: f32,
        step: u32,
        steps: u32,
    },
}

/// What a mode did to the shared components, for the engine to report.
#[derive(Clone, Debug, PartialEq)]
pub enum ModeSignal {
    BpmChanged {
        update: BpmUpdate,
        reason: BpmChangeReason,
    },
    PatternComplete {
        note: Option<NoteRef>,
        patterns_completed: u32,
    },
    SpeedUpTriggered {
        target_bpm: f32,
    },
    MetronomeUnmuted,
    /// Tempo handed back to the song's original BPM when a mode is torn down
    /// or rebuilt. Not a gameplay change, so it stays out of analytics.
    TempoRestored(BpmUpdate),
}

/// Borrowed view of the components a mode drives.
pub struct ModeContext<'a> {
    pub tempo: &'a mut TempoModel,
    pub metronome: &'a mut Metronome,
    pub clock: f64,
    pub out: &'a mut Vec<ModeSignal>,
}

impl ModeContext<'_> {
    fn reset_tempo(&mut self) {
        let update = self.tempo.reset_bpm();
        self.metronome.sync_from_tempo(self.clock, self.tempo.state());
        if update.changed() {
            self.out.push(ModeSignal::TempoRestored(update));
        }
    }
}

/// Owns the active mode and every delayed continuation it scheduled.
///
/// Each (re)initialization bumps `generation`; timer entries carry the
/// generation that scheduled them and are dropped if it is no longer current.
#[derive(Clone, Debug)]
pub struct ModeStateMachine {
    active: Option<GameMode>,
    status: ModeStatus,
    generation: u64,
    timers: TimerQueue<ModeTask>,
    perform: PerformSettings,
    speed_up: SpeedUpSettings,
    boundaries: Vec<u32>,
}

impl ModeStateMachine {
    pub fn new(perform: PerformSettings, speed_up: SpeedUpSettings) -> Self {
        Self {
            active: None,
            status: ModeStatus::Ended,
            generation: 0,
            timers: TimerQueue::new(),
            perform,
            speed_up,
            boundaries: Vec::new(),
        }
    }

    pub fn kind(&self) -> Option<ModeKind> {
        self.active.as_ref().map(GameMode::kind)
    }

    pub fn active(&self) -> Option<&GameMode> {
        self.active.as_ref()
    }

    pub fn status(&self) -> ModeStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == ModeStatus::Running
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn timing_model(&self) -> TimingModel {
        match self.kind() {
            Some(ModeKind::SpeedUp) => self.speed_up.timing_model,
            _ => self.perform.timing_model,
        }
    }

    pub fn spawn_offset(&self) -> f64 {
        match self.kind() {
            Some(ModeKind::SpeedUp) => self.speed_up.spawn_offset,
            _ => self.perform.spawn_offset,
        }
    }

    /// Sequence positions that open a SpeedUp pattern.
    pub fn set_boundaries(&mut self, boundaries: Vec<u32>) {
        self.boundaries = boundaries;
        if let Some(GameMode::SpeedUp(state)) = self.active.as_mut() {
            state.boundaries = self.boundaries.clone();
        }
    }

    /// Ends the current mode and initializes `kind` in its place.
    pub fn set_mode(&mut self, kind: ModeKind, ctx: &mut ModeContext<'_>) {
        self.end(ctx);
        info!(?kind, "mode selected");
        self.initialize(kind, ctx);
    }

    /// Rebuilds the current mode's state from scratch, as on restart.
    pub fn reinitialize(&mut self, ctx: &mut ModeContext<'_>) {
        if let Some(kind) = self.kind() {
            self.timers.cancel_owner(self.generation);
            self.initialize(kind, ctx);
        }
    }

    fn initialize(&mut self, kind: ModeKind, ctx: &mut ModeContext<'_>) {
        self.generation += 1;
        self.active = Some(match kind {
            ModeKind::Perform => GameMode::Perform(PerformState::default()),
            ModeKind::SpeedUp => GameMode::SpeedUp(PatternState {
                boundaries: self.boundaries.clone(),
                ..PatternState::default()
            }),
        });
        if kind == ModeKind::SpeedUp {
            ctx.reset_tempo();
        }
        self.status = ModeStatus::Initialized;
    }

    pub fn start(&mut self, ctx: &mut ModeContext<'_>) {
        let Some(mode) = self.active.as_ref() else {
            return;
        };
        if self.status != ModeStatus::Initialized {
            return;
        }
        ctx.metronome.sync_from_tempo(ctx.clock, ctx.tempo.state());
        ctx.metronome.start_on_grid(ctx.clock);
        match mode {
            GameMode::Perform(_) => ctx.metronome.mute(),
            GameMode::SpeedUp(_) => ctx.metronome.unmute(),
        }
        self.status = ModeStatus::Running;
        info!(kind = ?mode.kind(), clock = ctx.clock, "mode started");
    }

    pub fn pause(&mut self) {
        if self.status == ModeStatus::Running {
            self.status = ModeStatus::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.status == ModeStatus::Paused {
            self.status = ModeStatus::Running;
        }
    }

    /// Cancels everything the mode scheduled. SpeedUp hands the tempo back.
    pub fn end(&mut self, ctx: &mut ModeContext<'_>) {
        let Some(kind) = self.kind() else {
            return;
        };
        if self.status == ModeStatus::Ended {
            return;
        }
        let cancelled = self.timers.cancel_owner(self.generation);
        if kind == ModeKind::SpeedUp {
            ctx.reset_tempo();
        }
        ctx.metronome.stop();
        self.status = ModeStatus::Ended;
        info!(?kind, cancelled, "mode ended");
    }

    pub fn on_beat_hit(&mut self, note: &NoteRef, ctx: &mut ModeContext<'_>) {
        if self.status != ModeStatus::Running {
            return;
        }
        let generation = self.generation;
        match self.active.as_mut() {
            Some(GameMode::Perform(state)) => {
                state.consecutive_hits += 1;
                if state.consecutive_hits == self.perform.unmute_threshold
                    && state.pending_unmute.is_none()
                    && ctx.metronome.is_muted()
                {
                    let due = ctx.clock + ctx.tempo.seconds_per_beat();
                    state.pending_unmute =
                        Some(self.timers.schedule(due, generation, ModeTask::UnmuteMetronome));
                    debug!(due, "metronome unmute scheduled");
                }
            }
            Some(GameMode::SpeedUp(state)) => {
                if state.boundaries.contains(&note.sequence_position) {
                    state.pattern_hit_count = 0;
                }
                state.pattern_hit_count += 1;
                if state.pattern_hit_count >= self.speed_up.pattern_length {
                    state.pattern_hit_count = 0;
                    state.patterns_completed += 1;
                    let target_bpm = capped(
                        ctx.tempo.current_bpm() + self.speed_up.bpm_increase,
                        self.speed_up.max_bpm(),
                    );
                    info!(
                        patterns = state.patterns_completed,
                        target_bpm, "pattern complete, speeding up"
                    );
                    ctx.out.push(ModeSignal::PatternComplete {
                        note: Some(note.clone()),
                        patterns_completed: state.patterns_completed,
                    });
                    ctx.out.push(ModeSignal::SpeedUpTriggered { target_bpm });
                    let due = ctx.clock + ctx.tempo.seconds_per_beat();
                    self.timers.schedule(due, generation, ModeTask::BeginRamp);
                }
            }
            None => {}
        }
    }

    pub fn on_miss(&mut self, ctx: &mut ModeContext<'_>) {
        if self.status != ModeStatus::Running {
            return;
        }
        match self.active.as_mut() {
            Some(GameMode::Perform(state)) => {
                state.consecutive_hits = 0;
                if let Some(id) = state.pending_unmute.take() {
                    self.timers.cancel(id);
                }
                ctx.metronome.mute();
            }
            Some(GameMode::SpeedUp(state)) => {
                state.pattern_hit_count = 0;
            }
            None => {}
        }
    }

    /// Runs every continuation due at `ctx.clock` that belongs to the live mode.
    pub fn advance(&mut self, ctx: &mut ModeContext<'_>) {
        if self.status != ModeStatus::Running {
            return;
        }
        loop {
            let due = self.timers.pop_due(ctx.clock);
            if due.is_empty() {
                break;
            }
            for timer in due {
                if timer.owner != self.generation {
                    continue;
                }
                self.run_task(timer.payload, timer.due, ctx);
            }
        }
    }

    /// Follow-up steps are chained off `due` rather than the frame clock so a
    /// ramp keeps its spacing regardless of frame rate.
    fn run_task(&mut self, task: ModeTask, due: f64, ctx: &mut ModeContext<'_>) {
        let generation = self.generation;
        match task {
            ModeTask::UnmuteMetronome => {
                if let Some(GameMode::Perform(state)) = self.active.as_mut() {
                    state.pending_unmute = None;
                    ctx.metronome.unmute();
                    ctx.out.push(ModeSignal::MetronomeUnmuted);
                    debug!(clock = ctx.clock, "metronome unmuted");
                }
            }
            ModeTask::BeginRamp => {
                let from = ctx.tempo.current_bpm();
                let to = capped(from + self.speed_up.bpm_increase, self.speed_up.max_bpm());
                if to <= from {
                    return;
                }
                let steps = self.speed_up.ramp_steps;
                self.timers.schedule(
                    due + self.ramp_interval(),
                    generation,
                    ModeTask::RampStep {
                        from,
                        to,
                        step: 1,
                        steps,
                    },
                );
            }
            ModeTask::RampStep {
                from,
                to,
                step,
                steps,
            } => {
                let bpm = from + (to - from) * step as f32 / steps as f32;
                let update = ctx.tempo.set_bpm(bpm, self.speed_up.max_bpm());
                ctx.metronome.sync_from_tempo(ctx.clock, ctx.tempo.state());
                if update.changed() {
                    ctx.out.push(ModeSignal::BpmChanged {
                        update,
                        reason: BpmChangeReason::SpeedUp,
                    });
                }
                if step < steps {
                    self.timers.schedule(
                        due + self.ramp_interval(),
                        generation,
                        ModeTask::RampStep {
                            from,
                            to,
                            step: step + 1,
                            steps,
                        },
                    );
                } else if let Some(GameMode::SpeedUp(state)) = self.active.as_mut() {
                    state.accumulated_delta += to - from;
                }
            }
        }
    }

    fn ramp_interval(&self) -> f64 {
        self.speed_up.ramp_duration / self.speed_up.ramp_steps.max(1) as f64
    }
}

fn capped(bpm: f32, max_bpm: Option<f32>) -> f32 {
    match max_bpm {
        Some(max) => bpm.min(max),
        None => bpm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatline_domain::{MetronomeSettings, NoteRecord};

    struct Rig {
        modes: ModeStateMachine,
        tempo: TempoModel,
        metronome: Metronome,
        signals: Vec<ModeSignal>,
    }

    impl Rig {
        fn new(speed_up: SpeedUpSettings) -> Self {
            let tempo = TempoModel::new(60.0, 3.0);
            let metronome = Metronome::new(&MetronomeSettings::default(), tempo.state());
            Self {
                modes: ModeStateMachine::new(PerformSettings::default(), speed_up),
                tempo,
                metronome,
                signals: Vec::new(),
            }
        }

        fn with<R>(
            &mut self,
            clock: f64,
            f: impl FnOnce(&mut ModeStateMachine, &mut ModeContext<'_>) -> R,
        ) -> R {
            let mut ctx = ModeContext {
                tempo: &mut self.tempo,
                metronome: &mut self.metronome,
                clock,
                out: &mut self.signals,
            };
            f(&mut self.modes, &mut ctx)
        }

        fn hit(&mut self, position: u32, clock: f64) {
            let note = NoteRef::from(&NoteRecord::new("E4", position, clock, 0.5));
            self.with(clock, |modes, ctx| modes.on_beat_hit(&note, ctx));
        }

        fn advance_to(&mut self, clock: f64) {
            self.with(clock, |modes, ctx| modes.advance(ctx));
        }

        fn ramps(&self) -> usize {
            self.signals
                .iter()
                .filter(|s| matches!(s, ModeSignal::SpeedUpTriggered { .. }))
                .count()
        }
    }

    fn speed_up_rig() -> Rig {
        let mut rig = Rig::new(SpeedUpSettings::default());
        rig.with(0.0, |modes, ctx| {
            modes.set_mode(ModeKind::SpeedUp, ctx);
            modes.start(ctx);
        });
        rig
    }

    #[test]
    fn six_hits_trigger_one_ramp_to_new_tempo() {
        let mut rig = speed_up_rig();
        for (i, clock) in (0..6).zip([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]) {
            rig.hit(i, clock);
        }
        assert_eq!(rig.ramps(), 1);
        assert_eq!(rig.tempo.current_bpm(), 60.0);
        rig.advance_to(6.5);
        assert_eq!(rig.tempo.current_bpm(), 60.0);
        let mut clock = 7.0;
        while clock < 8.5 {
            rig.advance_to(clock);
            clock += 0.05;
        }
        assert!((rig.tempo.current_bpm() - 70.0).abs() < 1e-3);
        let steps = rig
            .signals
            .iter()
            .filter(|s| {
                matches!(s, ModeSignal::BpmChanged { reason: BpmChangeReason::SpeedUp, .. })
            })
            .count();
        assert_eq!(steps, 10);
        match rig.modes.active() {
            Some(GameMode::SpeedUp(state)) => {
                assert_eq!(state.pattern_hit_count, 0);
                assert!((state.accumulated_delta - 10.0).abs() < 1e-3);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn miss_mid_pattern_resets_count() {
        let mut rig = speed_up_rig();
        for i in 0..3 {
            rig.hit(i, 1.0 + i as f64);
        }
        rig.with(4.0, |modes, ctx| modes.on_miss(ctx));
        for i in 3..8 {
            rig.hit(i, 1.0 + i as f64);
        }
        assert_eq!(rig.ramps(), 0);
        rig.hit(8, 9.0);
        assert_eq!(rig.ramps(), 1);
    }

    #[test]
    fn boundary_restarts_count() {
        let mut rig = Rig::new(SpeedUpSettings::default());
        rig.modes.set_boundaries(vec![10]);
        rig.with(0.0, |modes, ctx| {
            modes.set_mode(ModeKind::SpeedUp, ctx);
            modes.start(ctx);
        });
        for i in 0..5 {
            rig.hit(i, 1.0 + i as f64);
        }
        rig.hit(10, 7.0);
        for i in 11..15 {
            rig.hit(i, 1.0 + i as f64);
        }
        assert_eq!(rig.ramps(), 0);
        rig.hit(15, 20.0);
        assert_eq!(rig.ramps(), 1);
    }

    #[test]
    fn ramp_respects_ceiling() {
        let settings = SpeedUpSettings {
            max_bpm: 65.0,
            ..SpeedUpSettings::default()
        };
        let mut rig = Rig::new(settings);
        rig.with(0.0, |modes, ctx| {
            modes.set_mode(ModeKind::SpeedUp, ctx);
            modes.start(ctx);
        });
        for round in 0..3 {
            let base = round as f64 * 20.0;
            for i in 0..6 {
                rig.hit(round * 6 + i, base + i as f64);
            }
            let mut clock = base + 5.0;
            while clock < base + 15.0 {
                rig.advance_to(clock);
                clock += 0.1;
            }
        }
        assert_eq!(rig.tempo.current_bpm(), 65.0);
    }

    #[test]
    fn ending_mode_cancels_pending_ramp_and_resets_tempo() {
        let mut rig = speed_up_rig();
        for i in 0..6 {
            rig.hit(i, 1.0 + i as f64);
        }
        rig.advance_to(7.5);
        rig.advance_to(7.65);
        assert!(rig.tempo.current_bpm() > 60.0);
        rig.with(7.7, |modes, ctx| modes.end(ctx));
        assert_eq!(rig.modes.pending_timers(), 0);
        assert_eq!(rig.tempo.current_bpm(), 60.0);
        assert!(matches!(
            rig.signals.last(),
            Some(ModeSignal::TempoRestored(update)) if update.new_bpm == 60.0
        ));
        assert!(!rig.signals.iter().any(|s| {
            matches!(s, ModeSignal::BpmChanged { reason: BpmChangeReason::Reset, .. })
        }));
        rig.advance_to(20.0);
        assert_eq!(rig.tempo.current_bpm(), 60.0);
        assert_eq!(rig.modes.status(), ModeStatus::Ended);
    }

    #[test]
    fn perform_unmutes_after_streak_and_remutes_on_miss() {
        let mut rig = Rig::new(SpeedUpSettings::default());
        rig.with(0.0, |modes, ctx| {
            modes.set_mode(ModeKind::Perform, ctx);
            modes.start(ctx);
        });
        assert!(rig.metronome.is_muted());
        for i in 0..3 {
            rig.hit(i, 1.0 + i as f64);
        }
        rig.advance_to(3.5);
        assert!(rig.metronome.is_muted());
        rig.advance_to(4.0);
        assert!(!rig.metronome.is_muted());
        rig.with(5.0, |modes, ctx| modes.on_miss(ctx));
        assert!(rig.metronome.is_muted());
    }

    #[test]
    fn miss_cancels_pending_unmute() {
        let mut rig = Rig::new(SpeedUpSettings::default());
        rig.with(0.0, |modes, ctx| {
            modes.set_mode(ModeKind::Perform, ctx);
            modes.start(ctx);
        });
        for i in 0..3 {
            rig.hit(i, 1.0 + i as f64);
        }
        rig.with(3.2, |modes, ctx| modes.on_miss(ctx));
        rig.advance_to(10.0);
        assert!(rig.metronome.is_muted());
    }

    #[test]
    fn paused_mode_ignores_hits_and_timers() {
        let mut rig = speed_up_rig();
        rig.modes.pause();
        for i in 0..6 {
            rig.hit(i, 1.0 + i as f64);
        }
        assert_eq!(rig.ramps(), 0);
        rig.modes.resume();
        assert!(rig.modes.is_running());
    }

    #[test]
    fn timing_model_follows_mode() {
        let mut rig = Rig::new(SpeedUpSettings::default());
        assert_eq!(rig.modes.timing_model(), TimingModel::Absolute);
        rig.with(0.0, |modes, ctx| modes.set_mode(ModeKind::SpeedUp, ctx));
        assert_eq!(rig.modes.timing_model(), TimingModel::Position);
        assert_eq!(rig.modes.spawn_offset(), 10.0);
        assert_eq!(rig.modes.status(), ModeStatus::Initialized);
    }
}
