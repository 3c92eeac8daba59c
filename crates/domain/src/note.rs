use serde::{Deserialize, Serialize};

/// Lane used for notes that arrive without a pitch.
pub const FALLBACK_LANE: &str = "C";
/// Pitch label carried by rest records.
pub const REST_PITCH: &str = "REST";

/// One scheduled musical event, created once per song load and never mutated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NoteRecord {
    /// Lane identifier, e.g. `E4` or `C5`.
    pub pitch: String,
    /// Ordinal within the song, strictly increasing across the record list.
    pub sequence_position: u32,
    /// Seconds from the start of the song under the original tempo.
    pub start_time: f64,
    /// Seconds.
    pub duration: f64,
    #[serde(default)]
    pub is_rest: bool,
}

impl NoteRecord {
    pub fn new(
        pitch: impl Into<String>,
        sequence_position: u32,
        start_time: f64,
        duration: f64,
    ) -> Self {
        Self {
            pitch: pitch.into(),
            sequence_position,
            start_time,
            duration,
            is_rest: false,
        }
    }

    pub fn rest(sequence_position: u32, start_time: f64, duration: f64) -> Self {
        Self {
            pitch: REST_PITCH.to_string(),
            sequence_position,
            start_time,
            duration,
            is_rest: true,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn lane_pitch(&self) -> &str {
        let trimmed = self.pitch.trim();
        if trimmed.is_empty() {
            FALLBACK_LANE
        } else {
            trimmed
        }
    }

    /// Pitch without its octave suffix (`E4` -> `E`).
    pub fn lane(&self) -> &str {
        strip_octave(self.lane_pitch())
    }

    /// Prefix match of a key label against this note, ignoring the octave on either side.
    pub fn matches_lane(&self, label: &str) -> bool {
        if self.is_rest {
            return false;
        }
        let label = strip_octave(label.trim());
        !label.is_empty() && self.lane_pitch().starts_with(label)
    }
}

pub fn strip_octave(pitch: &str) -> &str {
    pitch.trim_end_matches(|c: char| c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_ignores_octave() {
        let note = NoteRecord::new("E4", 0, 0.0, 1.0);
        assert_eq!(note.lane(), "E");
        assert!(note.matches_lane("E"));
        assert!(note.matches_lane("E5"));
        assert!(!note.matches_lane("D"));
    }

    #[test]
    fn empty_pitch_uses_fallback_lane() {
        let note = NoteRecord::new("", 3, 1.0, 0.5);
        assert_eq!(note.lane(), FALLBACK_LANE);
        assert!(note.matches_lane("C"));
    }

    #[test]
    fn rests_never_match() {
        let rest = NoteRecord::rest(1, 1.0, 1.0);
        assert!(!rest.matches_lane("R"));
        assert_eq!(rest.end_time(), 2.0);
    }
}
