pub mod error;
pub mod events;
pub mod io;
pub mod note;
pub mod settings;
pub mod song;
pub mod tempo;

pub use crate::error::DomainError;
pub use crate::events::{
    AnalyticsEvent, BpmChangeReason, NoteRef, SessionPhase, SessionTransition, TimingDirection,
};
pub use crate::io::{load_song_file, JsonSongLoader, MusicXmlLoader, SongFormat, SongLoader};
pub use crate::note::{NoteRecord, FALLBACK_LANE, REST_PITCH};
pub use crate::settings::{
    CandidateScope, MetronomeSettings, PerformSettings, SpeedUpSettings, TimingSettings,
    TrainerSettings,
};
pub use crate::song::Song;
pub use crate::tempo::{TempoState, TimingModel, DEFAULT_TRAVEL_TIME, MAX_BPM, MIN_BPM};
