use beatline_domain::TimingDirection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HitRating {
    Perfect,
    Great,
    Good,
    Ok,
    Poor,
}

impl HitRating {
    pub fn from_accuracy(accuracy: f32) -> Self {
        if accuracy >= 0.95 {
            HitRating::Perfect
        } else if accuracy >= 0.85 {
            HitRating::Great
        } else if accuracy >= 0.70 {
            HitRating::Good
        } else if accuracy >= 0.50 {
            HitRating::Ok
        } else {
            HitRating::Poor
        }
    }

    pub fn points(&self) -> u64 {
        match self {
            HitRating::Perfect => 100,
            HitRating::Great => 80,
            HitRating::Good => 60,
            HitRating::Ok => 40,
            HitRating::Poor => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceReport {
    /// Mean accuracy over every judged note, misses counting as zero.
    pub accuracy: f32,
    pub early_hits: usize,
    pub late_hits: usize,
}

impl PerformanceReport {
    pub fn empty() -> Self {
        Self {
            accuracy: 0.0,
            early_hits: 0,
            late_hits: 0,
        }
    }
}

/// Running score for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreTracker {
    pub score: u64,
    pub combo: u32,
    pub max_combo: u32,
    pub hits: usize,
    pub misses: usize,
    accuracy_sum: f64,
    early_hits: usize,
    late_hits: usize,
}

impl ScoreTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Scores a hit; `offset` is press time minus arrival time.
    pub fn record_hit(&mut self, accuracy: f32, offset: f64) -> HitRating {
        let rating = HitRating::from_accuracy(accuracy);
        self.combo += 1;
        self.max_combo = self.max_combo.max(self.combo);
        let multiplier = 1.0 + self.combo as f64 / 10.0;
        self.score += (rating.points() as f64 * multiplier).round() as u64;
        self.hits += 1;
        self.accuracy_sum += accuracy as f64;
        match TimingDirection::from_offset(offset) {
            TimingDirection::Early => self.early_hits += 1,
            TimingDirection::Late => self.late_hits += 1,
            TimingDirection::Exact => {}
        }
        rating
    }

    pub fn record_miss(&mut self) {
        self.combo = 0;
        self.misses += 1;
    }

    pub fn hit_percentage(&self) -> f32 {
        let judged = self.hits + self.misses;
        if judged == 0 {
            return 0.0;
        }
        self.hits as f32 / judged as f32 * 100.0
    }

    pub fn grade(&self) -> char {
        let pct = self.hit_percentage();
        if pct >= 95.0 {
            'S'
        } else if pct >= 90.0 {
            'A'
        } else if pct >= 80.0 {
            'B'
        } else if pct >= 70.0 {
            'C'
        } else if pct >= 60.0 {
            'D'
        } else {
            'F'
        }
    }

    pub fn report(&self) -> PerformanceReport {
        let judged = self.hits + self.misses;
        if judged == 0 {
            return PerformanceReport::empty();
        }
        PerformanceReport {
            accuracy: (self.accuracy_sum / judged as f64) as f32,
            early_hits: self.early_hits,
            late_hits: self.late_hits,
        }
    }
}
