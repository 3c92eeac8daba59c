use serde::{Deserialize, Serialize};

use crate::{note::NoteRecord, tempo::validate_song_bpm, DomainError};

/// A loaded chart: the ordered note list plus the tempo it was authored in.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Song {
    pub title: String,
    pub original_bpm: f32,
    pub notes: Vec<NoteRecord>,
    /// Sequence positions that open a new pattern, used by the speed-up mode.
    #[serde(default)]
    pub pattern_starts: Vec<u32>,
}

impl Song {
    pub fn new(title: impl Into<String>, original_bpm: f32, notes: Vec<NoteRecord>) -> Self {
        Self {
            title: title.into(),
            original_bpm,
            notes,
            pattern_starts: Vec::new(),
        }
    }

    pub fn empty(original_bpm: f32) -> Self {
        Self::new("", original_bpm, Vec::new())
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        validate_song_bpm(self.original_bpm)?;
        for pair in self.notes.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.sequence_position <= prev.sequence_position {
                return Err(DomainError::validation(format!(
                    "sequence positions must increase ({} after {})",
                    next.sequence_position, prev.sequence_position
                )));
            }
            if next.start_time < prev.start_time {
                return Err(DomainError::validation(format!(
                    "note {} starts before its predecessor",
                    next.sequence_position
                )));
            }
        }
        if let Some(bad) = self
            .notes
            .iter()
            .find(|n| !n.duration.is_finite() || n.duration < 0.0 || !n.start_time.is_finite())
        {
            return Err(DomainError::validation(format!(
                "note {} has an invalid time span",
                bad.sequence_position
            )));
        }
        Ok(())
    }

    /// End of the last note body, in original-tempo seconds.
    pub fn duration(&self) -> f64 {
        self.notes
            .iter()
            .map(NoteRecord::end_time)
            .fold(0.0, f64::max)
    }

    pub fn playable_count(&self) -> usize {
        self.notes.iter().filter(|n| !n.is_rest).count()
    }

    /// The generated speed-up drill: an E4 lead-in followed by five repeats of
    /// `E4 D4 C4 - G4 F4 E4 -`, four rest beats between repeats, one beat per slot.
    pub fn speed_up_drill(bpm: f32) -> Self {
        const PHRASE: [Option<&str>; 8] = [
            Some("E4"),
            Some("D4"),
            Some("C4"),
            None,
            Some("G4"),
            Some("F4"),
            Some("E4"),
            None,
        ];
        const REPEATS: usize = 5;
        const GAP_BEATS: usize = 4;

        let beat = 60.0 / bpm as f64;
        let mut notes = Vec::new();
        let mut pattern_starts = Vec::new();
        let mut position = 0u32;
        let push = |notes: &mut Vec<NoteRecord>, pitch: Option<&str>, position: &mut u32| {
            let start = *position as f64 * beat;
            notes.push(match pitch {
                Some(pitch) => NoteRecord::new(pitch, *position, start, beat),
                None => NoteRecord::rest(*position, start, beat),
            });
            *position += 1;
        };

        push(&mut notes, Some("E4"), &mut position);
        for _ in 0..3 {
            push(&mut notes, None, &mut position);
        }
        for repeat in 0..REPEATS {
            pattern_starts.push(position);
            for pitch in PHRASE {
                push(&mut notes, pitch, &mut position);
            }
            if repeat + 1 < REPEATS {
                for _ in 0..GAP_BEATS {
                    push(&mut notes, None, &mut position);
                }
            }
        }

        Self {
            title: "Speed Up Drill".to_string(),
            original_bpm: bpm,
            notes,
            pattern_starts,
        }
    }
}
