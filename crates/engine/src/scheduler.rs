use std::collections::HashSet;

use beatline_domain::{
    CandidateScope, NoteRecord, NoteRef, TempoState, TimingModel, TimingSettings,
};
use tracing::debug;

use crate::judge::InputSource;

/// Live, on-board instance of a [`NoteRecord`].
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveNote {
    record_index: usize,
    pub hit: bool,
    pub missed: bool,
    pub passed: bool,
    pub linked: Option<InputSource>,
    /// Fraction of the approach covered; 1.0 at the target, keeps growing after it.
    pub travel: f64,
}

impl ActiveNote {
    fn new(record_index: usize) -> Self {
        Self {
            record_index,
            hit: false,
            missed: false,
            passed: false,
            linked: None,
            travel: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SchedulerEvent {
    Spawned(NoteRef),
    Missed(NoteRef),
}

/// Owns the record list and every active instance.
#[derive(Clone, Debug)]
pub struct NoteScheduler {
    records: Vec<NoteRecord>,
    active: Vec<ActiveNote>,
    spawned: HashSet<u32>,
    judged: HashSet<u32>,
    spawn_offset: f64,
    arrival_offset: f64,
    cleanup_delay: f64,
    preview_horizon: f64,
}

impl NoteScheduler {
    pub fn new(settings: &TimingSettings) -> Self {
        Self {
            records: Vec::new(),
            active: Vec::new(),
            spawned: HashSet::new(),
            judged: HashSet::new(),
            spawn_offset: settings.spawn_offset,
            arrival_offset: settings.arrival_offset,
            cleanup_delay: settings.cleanup_delay,
            preview_horizon: settings.preview_horizon,
        }
    }

    pub fn load(&mut self, mut records: Vec<NoteRecord>) {
        records.sort_by_key(|record| record.sequence_position);
        debug!(count = records.len(), "scheduler loaded records");
        self.records = records;
        self.reset();
    }

    /// Drops every instance and forgets what was spawned or judged.
    pub fn reset(&mut self) {
        self.active.clear();
        self.spawned.clear();
        self.judged.clear();
    }

    pub fn set_spawn_offset(&mut self, spawn_offset: f64) {
        self.spawn_offset = spawn_offset.max(0.0);
    }

    pub fn spawn_offset(&self) -> f64 {
        self.spawn_offset
    }

    pub fn records(&self) -> &[NoteRecord] {
        &self.records
    }

    pub fn is_loaded(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn active(&self) -> impl Iterator<Item = (&NoteRecord, &ActiveNote)> {
        self.active
            .iter()
            .map(move |note| (&self.records[note.record_index], note))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn was_spawned(&self, sequence_position: u32) -> bool {
        self.spawned.contains(&sequence_position)
    }

    /// Latest instant any record is still on the board.
    pub fn last_end_time(&self, tempo: &TempoState, model: TimingModel) -> f64 {
        self.records
            .iter()
            .map(|record| model.end_time(record, tempo))
            .fold(0.0, f64::max)
    }

    /// Spawns the opening notes so they are visible before play starts.
    pub fn prespawn(
        &mut self,
        tempo: &TempoState,
        model: TimingModel,
        out: &mut Vec<SchedulerEvent>,
    ) {
        for index in 0..self.records.len() {
            let record = &self.records[index];
            if model.arrival_time(record, tempo) > self.preview_horizon {
                break;
            }
            if !record.is_rest {
                self.spawn(index, out);
            }
        }
    }

    /// Spawns everything already inside the spawn window at `clock`.
    pub fn spawn_initial(
        &mut self,
        clock: f64,
        tempo: &TempoState,
        model: TimingModel,
        out: &mut Vec<SchedulerEvent>,
    ) {
        self.spawn_due(clock, tempo, model, out);
    }

    pub fn tick(
        &mut self,
        clock: f64,
        preparing: bool,
        tempo: &TempoState,
        model: TimingModel,
        out: &mut Vec<SchedulerEvent>,
    ) {
        if preparing {
            self.update_travel(0.0, tempo, model);
            return;
        }
        self.spawn_due(clock, tempo, model, out);
        self.update_travel(clock, tempo, model);

        for note in &mut self.active {
            let record = &self.records[note.record_index];
            if !note.passed && clock > model.end_time(record, tempo) {
                note.passed = true;
                if !note.hit && !note.missed {
                    note.missed = true;
                    note.linked = None;
                    debug!(
                        position = record.sequence_position,
                        pitch = %record.pitch,
                        clock,
                        "note missed"
                    );
                    out.push(SchedulerEvent::Missed(NoteRef::from(record)));
                }
            }
        }

        let cleanup_delay = self.cleanup_delay;
        let records = &self.records;
        self.active.retain_mut(|note| {
            let record = &records[note.record_index];
            if clock <= model.arrival_time(record, tempo) + cleanup_delay {
                return true;
            }
            if !note.hit && !note.missed {
                note.missed = true;
                out.push(SchedulerEvent::Missed(NoteRef::from(record)));
            }
            false
        });
    }

    /// Records a hit on `sequence_position` and links it to `source`.
    pub fn mark_hit(&mut self, sequence_position: u32, source: InputSource) -> Option<NoteRef> {
        let index = self
            .records
            .iter()
            .position(|record| record.sequence_position == sequence_position)?;
        if !self.judged.insert(sequence_position) {
            return None;
        }
        if let Some(note) = self
            .active
            .iter_mut()
            .find(|note| note.record_index == index)
        {
            note.hit = true;
            note.linked = Some(source);
        }
        Some(NoteRef::from(&self.records[index]))
    }

    /// Unlinks whatever `source` is holding.
    pub fn release(&mut self, source: &InputSource) -> Option<NoteRef> {
        let note = self
            .active
            .iter_mut()
            .find(|note| note.linked.as_ref() == Some(source))?;
        note.linked = None;
        Some(NoteRef::from(&self.records[note.record_index]))
    }

    /// Records a press may still be matched against.
    pub fn candidates(&self, scope: CandidateScope) -> Vec<&NoteRecord> {
        match scope {
            CandidateScope::ActiveOnly => self
                .active
                .iter()
                .filter(|note| !note.hit && !note.missed)
                .map(|note| &self.records[note.record_index])
                .filter(|record| self.is_open(record))
                .collect(),
            CandidateScope::AllRecords => self
                .records
                .iter()
                .filter(|record| self.is_open(record))
                .collect(),
        }
    }

    fn is_open(&self, record: &NoteRecord) -> bool {
        !record.is_rest && !self.judged.contains(&record.sequence_position)
    }

    pub fn travel_fraction(
        &self,
        record: &NoteRecord,
        clock: f64,
        tempo: &TempoState,
        model: TimingModel,
    ) -> f64 {
        let travel_time = tempo.note_travel_time();
        let virtual_start = model.arrival_time(record, tempo) + self.arrival_offset - travel_time;
        (clock - virtual_start) / travel_time
    }

    fn spawn_due(
        &mut self,
        clock: f64,
        tempo: &TempoState,
        model: TimingModel,
        out: &mut Vec<SchedulerEvent>,
    ) {
        for index in 0..self.records.len() {
            let record = &self.records[index];
            let arrival = model.arrival_time(record, tempo);
            if clock + self.spawn_offset < arrival {
                break;
            }
            if record.is_rest {
                continue;
            }
            if arrival > clock {
                self.spawn(index, out);
            } else if clock > model.end_time(record, tempo) {
                self.expire_unspawned(index, clock, out);
            }
        }
    }

    /// A record can jump from beyond the spawn window to fully passed between
    /// two ticks (long frame gap, or a tempo ramp pulling arrivals in). It never
    /// gets an instance but still misses once.
    fn expire_unspawned(&mut self, index: usize, clock: f64, out: &mut Vec<SchedulerEvent>) {
        let record = &self.records[index];
        if !self.spawned.insert(record.sequence_position)
            || self.judged.contains(&record.sequence_position)
        {
            return;
        }
        debug!(
            position = record.sequence_position,
            pitch = %record.pitch,
            clock,
            "note passed unspawned"
        );
        out.push(SchedulerEvent::Missed(NoteRef::from(record)));
    }

    fn spawn(&mut self, index: usize, out: &mut Vec<SchedulerEvent>) {
        let record = &self.records[index];
        if !self.spawned.insert(record.sequence_position) {
            return;
        }
        debug!(position = record.sequence_position, pitch = %record.pitch, "note spawned");
        out.push(SchedulerEvent::Spawned(NoteRef::from(record)));
        let mut note = ActiveNote::new(index);
        note.hit = self.judged.contains(&record.sequence_position);
        self.active.push(note);
    }

    fn update_travel(&mut self, clock: f64, tempo: &TempoState, model: TimingModel) {
        for index in 0..self.active.len() {
            let record = &self.records[self.active[index].record_index];
            let travel = self.travel_fraction(record, clock, tempo, model);
            self.active[index].travel = travel;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scheduler_with(notes: Vec<NoteRecord>) -> NoteScheduler {
        let mut scheduler = NoteScheduler::new(&TimingSettings::default());
        scheduler.load(notes);
        scheduler
    }

    fn run(scheduler: &mut NoteScheduler, from: f64, to: f64, dt: f64) -> Vec<SchedulerEvent> {
        let tempo = TempoState::new(60.0, 3.0);
        let mut events = Vec::new();
        let mut clock = from;
        while clock <= to {
            scheduler.tick(clock, false, &tempo, TimingModel::Absolute, &mut events);
            clock += dt;
        }
        events
    }

    fn misses(events: &[SchedulerEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|event| match event {
                SchedulerEvent::Missed(note) => Some(note.sequence_position),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn spawns_inside_window_only() {
        let mut scheduler = scheduler_with(vec![
            NoteRecord::new("C4", 0, 2.0, 0.5),
            NoteRecord::new("D4", 1, 6.0, 0.5),
        ]);
        let events = run(&mut scheduler, 0.0, 0.0, 1.0);
        assert_eq!(events, vec![SchedulerEvent::Spawned(NoteRef::from(&scheduler.records()[0]))]);
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn unhit_note_misses_exactly_once() {
        let mut scheduler = scheduler_with(vec![
            NoteRecord::new("C4", 0, 1.0, 0.5),
            NoteRecord::rest(1, 1.5, 0.5),
            NoteRecord::new("E4", 2, 2.0, 0.5),
        ]);
        let events = run(&mut scheduler, 0.0, 10.0, 1.0 / 60.0);
        assert_eq!(misses(&events), vec![0, 2]);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn hit_note_never_misses_and_never_respawns() {
        let mut scheduler = scheduler_with(vec![NoteRecord::new("C4", 0, 1.0, 0.5)]);
        let mut events = run(&mut scheduler, 0.0, 0.5, 0.1);
        assert!(scheduler.mark_hit(0, InputSource::new("C")).is_some());
        assert!(scheduler.mark_hit(0, InputSource::new("C")).is_none());
        events.extend(run(&mut scheduler, 0.6, 8.0, 0.1));
        assert!(misses(&events).is_empty());
        let spawns = events
            .iter()
            .filter(|event| matches!(event, SchedulerEvent::Spawned(_)))
            .count();
        assert_eq!(spawns, 1);
    }

    #[test]
    fn gc_before_pass_still_misses_once() {
        let mut settings = TimingSettings::default();
        settings.cleanup_delay = 0.5;
        let mut scheduler = NoteScheduler::new(&settings);
        scheduler.load(vec![NoteRecord::new("C4", 0, 1.0, 3.0)]);
        let events = run(&mut scheduler, 0.0, 6.0, 0.25);
        assert_eq!(misses(&events), vec![0]);
    }

    #[test]
    fn travel_is_unclamped() {
        let scheduler = scheduler_with(vec![NoteRecord::new("C4", 0, 5.0, 1.0)]);
        let tempo = TempoState::new(60.0, 3.0);
        let record = &scheduler.records()[0];
        assert_relative_eq!(
            scheduler.travel_fraction(record, 2.0, &tempo, TimingModel::Absolute),
            0.0
        );
        assert_relative_eq!(
            scheduler.travel_fraction(record, 5.0, &tempo, TimingModel::Absolute),
            1.0
        );
        assert_relative_eq!(
            scheduler.travel_fraction(record, 5.6, &tempo, TimingModel::Absolute),
            1.2
        );
    }

    #[test]
    fn preparing_positions_against_zero() {
        let mut scheduler = scheduler_with(vec![
            NoteRecord::new("C4", 0, 1.0, 1.0),
            NoteRecord::new("D4", 1, 4.0, 1.0),
            NoteRecord::new("E4", 2, 7.0, 1.0),
        ]);
        let mut events = Vec::new();
        let tempo = TempoState::new(60.0, 3.0);
        scheduler.prespawn(&tempo, TimingModel::Absolute, &mut events);
        assert_eq!(events.len(), 2);
        scheduler.tick(42.0, true, &tempo, TimingModel::Absolute, &mut events);
        let travels: Vec<f64> = scheduler.active().map(|(_, note)| note.travel).collect();
        assert_relative_eq!(travels[0], 2.0 / 3.0);
        assert_relative_eq!(travels[1], -1.0 / 3.0);
        assert!(misses(&events).is_empty());
    }

    #[test]
    fn preview_follows_position_arrivals() {
        let mut scheduler = scheduler_with(vec![
            NoteRecord::new("C4", 0, 0.0, 0.5),
            NoteRecord::new("D4", 4, 1.0, 0.5),
            NoteRecord::new("E4", 8, 2.0, 0.5),
        ]);
        let tempo = TempoState::new(60.0, 3.0);
        let mut events = Vec::new();
        scheduler.prespawn(&tempo, TimingModel::Position, &mut events);
        let previewed: Vec<u32> = scheduler
            .active()
            .map(|(record, _)| record.sequence_position)
            .collect();
        assert_eq!(previewed, vec![0, 4]);
    }

    #[test]
    fn note_skipped_by_frame_gap_misses_once() {
        let mut scheduler = scheduler_with(vec![
            NoteRecord::new("C4", 0, 1.0, 0.5),
            NoteRecord::new("D4", 1, 10.0, 0.5),
        ]);
        let tempo = TempoState::new(60.0, 3.0);
        let mut events = Vec::new();
        for clock in [0.0, 6.9, 10.5, 10.6, 20.0] {
            scheduler.tick(clock, false, &tempo, TimingModel::Absolute, &mut events);
        }
        assert_eq!(misses(&events), vec![0, 1]);
        assert!(!scheduler.active().any(|(record, _)| record.sequence_position == 1));
    }

    #[test]
    fn release_is_idempotent() {
        let mut scheduler = scheduler_with(vec![NoteRecord::new("C4", 0, 1.0, 2.0)]);
        run(&mut scheduler, 0.0, 0.0, 1.0);
        let source = InputSource::new("C");
        scheduler.mark_hit(0, source.clone());
        assert!(scheduler.release(&source).is_some());
        assert!(scheduler.release(&source).is_none());
    }

    #[test]
    fn all_records_scope_includes_unspawned() {
        let scheduler = scheduler_with(vec![
            NoteRecord::new("C4", 0, 1.0, 1.0),
            NoteRecord::rest(1, 2.0, 1.0),
        ]);
        assert!(scheduler.candidates(CandidateScope::ActiveOnly).is_empty());
        assert_eq!(scheduler.candidates(CandidateScope::AllRecords).len(), 1);
    }
}
