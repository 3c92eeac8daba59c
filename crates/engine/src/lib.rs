pub mod analytics;
pub mod engine;
pub mod judge;
pub mod metronome;
pub mod modes;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod tempo;
pub mod timers;

pub use analytics::{AnalyticsSink, SessionLog, SessionStats};
pub use engine::{EngineEvent, NoteView, TrainerEngine};
pub use judge::{HitJudge, InputSource, MatchResult};
pub use metronome::{BeatEvent, Metronome, MetronomeStatus};
pub use modes::{GameMode, ModeKind, ModeStateMachine, ModeStatus};
pub use scheduler::{ActiveNote, NoteScheduler, SchedulerEvent};
pub use scoring::{HitRating, PerformanceReport, ScoreTracker};
pub use session::SessionStateMachine;
pub use tempo::{BpmUpdate, TempoModel};
pub use timers::{TimerId, TimerQueue};
