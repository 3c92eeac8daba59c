use beatline_domain::{
    AnalyticsEvent, BpmChangeReason, NoteRef, SessionPhase, SessionTransition, Song, TimingModel,
    TrainerSettings,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analytics::{AnalyticsSink, SessionLog};
use crate::judge::{HitJudge, InputSource, MatchResult};
use crate::metronome::{BeatEvent, Metronome};
use crate::modes::{ModeContext, ModeKind, ModeSignal, ModeStateMachine};
use crate::scheduler::{NoteScheduler, SchedulerEvent};
use crate::scoring::ScoreTracker;
use crate::session::SessionStateMachine;
use crate::tempo::{BpmUpdate, TempoModel};

/// Everything the engine did since the last [`TrainerEngine::drain_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Spawned(NoteRef),
    Hit {
        note: NoteRef,
        accuracy: f32,
        offset: f64,
    },
    Miss(NoteRef),
    Release(NoteRef),
    Beat(BeatEvent),
    BpmChanged {
        old_bpm: f32,
        new_bpm: f32,
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
    Session(SessionTransition),
}

/// Per-instance state handed to a renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteView {
    pub pitch: String,
    pub lane: String,
    pub sequence_position: u32,
    pub arrival: f64,
    pub travel: f64,
    pub hit: bool,
    pub missed: bool,
}

/// Owns every timing component and runs them in a fixed order each tick.
pub struct TrainerEngine {
    settings: TrainerSettings,
    song: Option<Song>,
    tempo: TempoModel,
    scheduler: NoteScheduler,
    judge: HitJudge,
    metronome: Metronome,
    modes: ModeStateMachine,
    session: SessionStateMachine,
    score: ScoreTracker,
    log: SessionLog,
    sinks: Vec<Box<dyn AnalyticsSink>>,
    clock: f64,
    paused: bool,
    events: Vec<EngineEvent>,
    warned_missing_song: bool,
}

impl TrainerEngine {
    pub fn new(mut settings: TrainerSettings) -> Self {
        settings.validate();
        let tempo = TempoModel::new(60.0, settings.timing.base_travel_time);
        let metronome = Metronome::new(&settings.metronome, tempo.state());
        let mut engine = Self {
            scheduler: NoteScheduler::new(&settings.timing),
            judge: HitJudge::new(&settings.timing),
            modes: ModeStateMachine::new(settings.perform.clone(), settings.speed_up.clone()),
            session: SessionStateMachine::new(),
            score: ScoreTracker::new(),
            log: SessionLog::new(),
            sinks: Vec::new(),
            song: None,
            clock: 0.0,
            paused: false,
            events: Vec::new(),
            warned_missing_song: false,
            tempo,
            metronome,
            settings,
        };
        engine.with_modes(|modes, ctx| modes.set_mode(ModeKind::Perform, ctx));
        engine.scheduler.set_spawn_offset(engine.modes.spawn_offset());
        engine
    }

    pub fn add_sink(&mut self, sink: Box<dyn AnalyticsSink>) {
        self.sinks.push(sink);
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    pub fn song(&self) -> Option<&Song> {
        self.song.as_ref()
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn tempo(&self) -> &TempoModel {
        &self.tempo
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    pub fn modes(&self) -> &ModeStateMachine {
        &self.modes
    }

    pub fn scheduler(&self) -> &NoteScheduler {
        &self.scheduler
    }

    pub fn score(&self) -> &ScoreTracker {
        &self.score
    }

    pub fn session_log(&self) -> &SessionLog {
        &self.log
    }

    pub fn timing_model(&self) -> TimingModel {
        self.modes.timing_model()
    }

    pub fn load_song(&mut self, song: Song) {
        info!(
            title = %song.title,
            notes = song.notes.len(),
            bpm = song.original_bpm,
            "song loaded"
        );
        self.tempo.load(song.original_bpm);
        self.scheduler.load(song.notes.clone());
        self.modes
            .set_boundaries(self.settings.speed_up.boundaries_for(&song));
        self.song = Some(song);
        self.warned_missing_song = false;
        self.restart();
    }

    /// Switches mode and puts the session back into Preparing.
    pub fn set_mode(&mut self, kind: ModeKind) {
        self.with_modes(|modes, ctx| modes.set_mode(kind, ctx));
        self.scheduler.set_spawn_offset(self.modes.spawn_offset());
        self.restart();
    }

    /// Leaves Preparing without waiting for a first hit.
    pub fn start_game(&mut self) {
        if self.song.is_none() {
            self.warn_missing_song();
            return;
        }
        if !self.session.is_preparing() {
            return;
        }
        self.enter_playing();
    }

    pub fn tick(&mut self, dt: f64) {
        if self.song.is_none() {
            self.warn_missing_song();
            return;
        }
        if self.paused || self.session.is_ended() {
            return;
        }
        let model = self.modes.timing_model();
        if self.session.is_preparing() {
            let mut ignored = Vec::new();
            self.scheduler
                .tick(self.clock, true, self.tempo.state(), model, &mut ignored);
            return;
        }

        self.clock += dt.max(0.0);
        let mut scheduled = Vec::new();
        self.scheduler
            .tick(self.clock, false, self.tempo.state(), model, &mut scheduled);
        for event in scheduled {
            match event {
                SchedulerEvent::Spawned(note) => self.events.push(EngineEvent::Spawned(note)),
                SchedulerEvent::Missed(note) => self.register_miss(note),
            }
        }

        self.with_modes(|modes, ctx| modes.advance(ctx));

        let mut beats = Vec::new();
        self.metronome
            .tick(self.clock, self.tempo.state(), &mut beats);
        self.events.extend(beats.into_iter().map(EngineEvent::Beat));

        let model = self.modes.timing_model();
        let last_end = self.scheduler.last_end_time(self.tempo.state(), model);
        if self.clock > last_end && self.scheduler.active_count() == 0 {
            self.end_session();
        }
    }

    /// Judges a press on `lane_label`. While Preparing, a press that matches a
    /// previewed note starts play at that note's arrival.
    pub fn press(&mut self, lane_label: &str) -> MatchResult {
        if self.song.is_none() {
            self.warn_missing_song();
            return MatchResult::none();
        }
        if self.paused || self.session.is_ended() {
            return MatchResult::none();
        }
        let source = InputSource::new(lane_label);
        let model = self.modes.timing_model();

        if self.session.is_preparing() {
            let scope = self.settings.timing.candidate_scope;
            let first = self
                .scheduler
                .candidates(scope)
                .into_iter()
                .filter(|record| record.matches_lane(lane_label))
                .map(|record| model.arrival_time(record, self.tempo.state()))
                .min_by(f64::total_cmp);
            let Some(arrival) = first else {
                return MatchResult::none();
            };
            self.clock = arrival;
            self.enter_playing();
        }

        let result = self.judge.on_press(
            &mut self.scheduler,
            self.tempo.state(),
            model,
            &source,
            self.clock,
        );
        if let Some(note) = result.note.clone() {
            self.score.record_hit(result.accuracy, result.offset);
            self.emit_analytics(AnalyticsEvent::NoteHit {
                note: note.clone(),
                accuracy: result.accuracy,
                timestamp: self.clock,
            });
            self.events.push(EngineEvent::Hit {
                note: note.clone(),
                accuracy: result.accuracy,
                offset: result.offset,
            });
            self.with_modes(|modes, ctx| modes.on_beat_hit(&note, ctx));
        }
        result
    }

    pub fn release(&mut self, lane_label: &str) -> Option<NoteRef> {
        let source = InputSource::new(lane_label);
        let note = self.judge.on_release(&mut self.scheduler, &source)?;
        self.emit_analytics(AnalyticsEvent::NoteRelease {
            note: note.clone(),
            timestamp: self.clock,
        });
        self.events.push(EngineEvent::Release(note.clone()));
        Some(note)
    }

    pub fn pause(&mut self) {
        if self.session.is_playing() && !self.paused {
            self.paused = true;
            self.modes.pause();
            info!(clock = self.clock, "paused");
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.modes.resume();
            info!(clock = self.clock, "resumed");
        }
    }

    /// Clears every component and returns to Preparing with the opening notes previewed.
    pub fn restart(&mut self) {
        if self.session.is_playing() {
            self.close_log();
        }
        self.scheduler.reset();
        self.score.reset();
        self.clock = 0.0;
        self.paused = false;
        self.with_modes(|modes, ctx| modes.reinitialize(ctx));
        self.metronome.reset(self.tempo.state());
        if let Some(change) = self.session.transition(SessionPhase::Preparing, self.clock) {
            self.events.push(EngineEvent::Session(change));
        }

        let model = self.modes.timing_model();
        let mut spawned = Vec::new();
        self.scheduler
            .prespawn(self.tempo.state(), model, &mut spawned);
        self.scheduler
            .tick(self.clock, true, self.tempo.state(), model, &mut spawned);
        for event in spawned {
            if let SchedulerEvent::Spawned(note) = event {
                self.events.push(EngineEvent::Spawned(note));
            }
        }
    }

    pub fn end_session(&mut self) {
        if !self.session.is_playing() {
            return;
        }
        self.paused = false;
        self.with_modes(|modes, ctx| modes.end(ctx));
        self.metronome.stop();
        if let Some(change) = self.session.transition(SessionPhase::End, self.clock) {
            self.events.push(EngineEvent::Session(change));
        }
        self.close_log();
        info!(
            hits = self.score.hits,
            misses = self.score.misses,
            grade = %self.score.grade(),
            "session ended"
        );
    }

    /// Manual tempo change. Not capped by the SpeedUp ceiling, only by the
    /// runtime BPM range.
    pub fn set_bpm(&mut self, bpm: f32) -> BpmUpdate {
        let update = self.tempo.set_bpm(bpm, None);
        self.apply_tempo_change(update, BpmChangeReason::Manual);
        update
    }

    pub fn reset_bpm(&mut self) -> BpmUpdate {
        let update = self.tempo.reset_bpm();
        self.apply_tempo_change(update, BpmChangeReason::Reset);
        update
    }

    pub fn travel_view(&self) -> Vec<NoteView> {
        let model = self.modes.timing_model();
        self.scheduler
            .active()
            .map(|(record, note)| NoteView {
                pitch: record.pitch.clone(),
                lane: record.lane().to_string(),
                sequence_position: record.sequence_position,
                arrival: model.arrival_time(record, self.tempo.state()),
                travel: note.travel,
                hit: note.hit,
                missed: note.missed,
            })
            .collect()
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn enter_playing(&mut self) {
        if let Some(change) = self.session.transition(SessionPhase::Playing, self.clock) {
            self.events.push(EngineEvent::Session(change));
        }
        let title = self
            .song
            .as_ref()
            .map(|song| song.title.clone())
            .unwrap_or_default();
        let bpm = self.tempo.current_bpm();
        self.log.session_started(&title, bpm);
        for sink in &mut self.sinks {
            sink.session_started(&title, bpm);
        }
        self.with_modes(|modes, ctx| modes.start(ctx));

        let mut spawned = Vec::new();
        self.scheduler.spawn_initial(
            self.clock,
            self.tempo.state(),
            self.modes.timing_model(),
            &mut spawned,
        );
        for event in spawned {
            match event {
                SchedulerEvent::Spawned(note) => self.events.push(EngineEvent::Spawned(note)),
                SchedulerEvent::Missed(note) => self.register_miss(note),
            }
        }
    }

    fn register_miss(&mut self, note: NoteRef) {
        self.score.record_miss();
        self.emit_analytics(AnalyticsEvent::NoteMiss {
            note: note.clone(),
            timestamp: self.clock,
        });
        self.events.push(EngineEvent::Miss(note));
        self.with_modes(|modes, ctx| modes.on_miss(ctx));
    }

    fn apply_tempo_change(&mut self, update: BpmUpdate, reason: BpmChangeReason) {
        self.metronome.sync_from_tempo(self.clock, self.tempo.state());
        if update.changed() {
            self.report_bpm_change(update, reason);
        }
    }

    fn report_bpm_change(&mut self, update: BpmUpdate, reason: BpmChangeReason) {
        self.emit_analytics(AnalyticsEvent::BpmChange {
            old_bpm: update.old_bpm,
            new_bpm: update.new_bpm,
            reason,
            timestamp: self.clock,
        });
        self.events.push(EngineEvent::BpmChanged {
            old_bpm: update.old_bpm,
            new_bpm: update.new_bpm,
            reason,
        });
    }

    fn with_modes<R>(
        &mut self,
        f: impl FnOnce(&mut ModeStateMachine, &mut ModeContext<'_>) -> R,
    ) -> R {
        let mut signals = Vec::new();
        let mut ctx = ModeContext {
            tempo: &mut self.tempo,
            metronome: &mut self.metronome,
            clock: self.clock,
            out: &mut signals,
        };
        let result = f(&mut self.modes, &mut ctx);
        for signal in signals {
            match signal {
                ModeSignal::BpmChanged { update, reason } => self.report_bpm_change(update, reason),
                ModeSignal::PatternComplete {
                    note,
                    patterns_completed,
                } => {
                    self.emit_analytics(AnalyticsEvent::PatternComplete {
                        note: note.clone(),
                        timestamp: self.clock,
                    });
                    self.events.push(EngineEvent::PatternComplete {
                        note,
                        patterns_completed,
                    });
                }
                ModeSignal::SpeedUpTriggered { target_bpm } => {
                    self.events.push(EngineEvent::SpeedUpTriggered { target_bpm });
                }
                ModeSignal::MetronomeUnmuted => self.events.push(EngineEvent::MetronomeUnmuted),
                ModeSignal::TempoRestored(update) => self.events.push(EngineEvent::BpmChanged {
                    old_bpm: update.old_bpm,
                    new_bpm: update.new_bpm,
                    reason: BpmChangeReason::Reset,
                }),
            }
        }
        result
    }

    fn emit_analytics(&mut self, event: AnalyticsEvent) {
        self.log.record(&event);
        for sink in &mut self.sinks {
            sink.record(&event);
        }
    }

    fn close_log(&mut self) {
        self.log.session_ended(self.clock);
        for sink in &mut self.sinks {
            sink.session_ended(self.clock);
        }
    }

    fn warn_missing_song(&mut self) {
        if !self.warned_missing_song {
            warn!("no song loaded; ignoring engine input");
            self.warned_missing_song = true;
        }
    }
}
