use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{error::DomainError, note::NoteRecord, song::Song};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SongFormat {
    MusicXml,
    Json,
}

impl SongFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "xml" | "musicxml" => Some(SongFormat::MusicXml),
            "json" => Some(SongFormat::Json),
            _ => None,
        }
    }
}

pub trait SongLoader {
    fn load(&self, source: &str) -> Result<Song, DomainError>;
}

/// Reads a serialized [`Song`].
pub struct JsonSongLoader;

impl SongLoader for JsonSongLoader {
    fn load(&self, source: &str) -> Result<Song, DomainError> {
        let song: Song = serde_json::from_str(source)?;
        song.validate()?;
        Ok(song)
    }
}

/// Reads the learner part of a MusicXML score into a flat record list.
pub struct MusicXmlLoader {
    pub learner_part: String,
}

impl Default for MusicXmlLoader {
    fn default() -> Self {
        Self {
            learner_part: "P1".to_string(),
        }
    }
}

#[derive(Default)]
struct RawNote {
    ticks: u32,
    step: Option<String>,
    octave: Option<String>,
    is_rest: bool,
}

impl SongLoader for MusicXmlLoader {
    fn load(&self, source: &str) -> Result<Song, DomainError> {
        let mut reader = Reader::from_str(source);
        reader.trim_text(true);

        let mut title = String::new();
        let mut bpm: Option<f32> = None;
        let mut divisions: Option<u32> = None;
        let mut in_learner_part = false;
        let mut found_part = false;
        let mut stack: Vec<String> = Vec::new();
        let mut current: Option<RawNote> = None;
        let mut raw_notes = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(element) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    match name.as_str() {
                        "part" => {
                            let id = match element.try_get_attribute("id")? {
                                Some(attr) => attr.unescape_value()?.into_owned(),
                                None => String::new(),
                            };
                            in_learner_part = id == self.learner_part;
                            found_part |= in_learner_part;
                        }
                        "note" if in_learner_part => current = Some(RawNote::default()),
                        "rest" => {
                            if let Some(note) = current.as_mut() {
                                note.is_rest = true;
                            }
                        }
                        _ => {}
                    }
                    stack.push(name);
                }
                Event::Empty(element) => {
                    if element.name().as_ref() == b"rest" {
                        if let Some(note) = current.as_mut() {
                            note.is_rest = true;
                        }
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape()?.trim().to_string();
                    match stack.last().map(String::as_str) {
                        Some("work-title") | Some("movement-title") if title.is_empty() => {
                            title = value;
                        }
                        Some("per-minute") if bpm.is_none() => {
                            bpm = Some(value.parse().map_err(|_| {
                                DomainError::parse(format!("invalid per-minute value {value:?}"))
                            })?);
                        }
                        Some("divisions") if divisions.is_none() => {
                            divisions = Some(value.parse().map_err(|_| {
                                DomainError::parse(format!("invalid divisions value {value:?}"))
                            })?);
                        }
                        Some("duration") => {
                            if let Some(note) = current.as_mut() {
                                note.ticks = value.parse().map_err(|_| {
                                    DomainError::parse(format!("invalid duration {value:?}"))
                                })?;
                            }
                        }
                        Some("step") => {
                            if let Some(note) = current.as_mut() {
                                note.step = Some(value);
                            }
                        }
                        Some("octave") => {
                            if let Some(note) = current.as_mut() {
                                note.octave = Some(value);
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(element) => {
                    stack.pop();
                    match element.name().as_ref() {
                        b"note" => {
                            if let Some(note) = current.take() {
                                raw_notes.push(note);
                            }
                        }
                        b"part" => in_learner_part = false,
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !found_part {
            return Err(DomainError::parse(format!(
                "learner part {} not found",
                self.learner_part
            )));
        }

        let bpm = bpm.unwrap_or(60.0);
        let divisions = divisions.unwrap_or(8).max(1);
        let seconds_per_tick = 60.0 / (bpm as f64 * divisions as f64);
        debug!(bpm, divisions, count = raw_notes.len(), "parsed learner part");

        let mut start_time = 0.0;
        let mut notes = Vec::with_capacity(raw_notes.len());
        for (position, raw) in raw_notes.into_iter().enumerate() {
            let duration = raw.ticks as f64 * seconds_per_tick;
            let position = position as u32;
            let record = if raw.is_rest {
                NoteRecord::rest(position, start_time, duration)
            } else {
                let pitch = match (raw.step, raw.octave) {
                    (Some(step), Some(octave)) => format!("{step}{octave}"),
                    _ => String::new(),
                };
                NoteRecord::new(pitch, position, start_time, duration)
            };
            notes.push(record);
            start_time += duration;
        }

        let song = Song::new(title, bpm, notes);
        song.validate()?;
        Ok(song)
    }
}

/// Picks a loader from the file extension and reads the song.
#[instrument]
pub fn load_song_file(path: &Path) -> Result<Song, DomainError> {
    let format = SongFormat::from_path(path).ok_or_else(|| {
        DomainError::validation(format!("unrecognized song format: {}", path.display()))
    })?;
    let source = std::fs::read_to_string(path)?;
    let song = match format {
        SongFormat::MusicXml => MusicXmlLoader::default().load(&source)?,
        SongFormat::Json => JsonSongLoader.load(&source)?,
    };
    info!(title = %song.title, notes = song.notes.len(), bpm = song.original_bpm, "loaded song");
    Ok(song)
}
