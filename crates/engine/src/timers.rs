/// Handle returned by [`TimerQueue::schedule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// An entry removed from the queue because its time came.
#[derive(Clone, Debug, PartialEq)]
pub struct DueTimer<T> {
    pub id: TimerId,
    pub due: f64,
    pub owner: u64,
    pub payload: T,
}

/// Delayed continuations keyed on the simulation clock.
///
/// Each entry carries an `owner` tag (the mode generation that scheduled it)
/// so everything a finished mode left behind can be dropped in one call.
#[derive(Clone, Debug)]
pub struct TimerQueue<T> {
    entries: Vec<DueTimer<T>>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: f64, owner: u64, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(DueTimer {
            id,
            due,
            owner,
            payload,
        });
        id
    }

    /// Returns false when the entry already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub fn cancel_owner(&mut self, owner: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.owner != owner);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns every entry due at or before `clock`, earliest first.
    pub fn pop_due(&mut self, clock: f64) -> Vec<DueTimer<T>> {
        let mut due = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].due <= clock {
                due.push(self.entries.swap_remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.id.cmp(&b.id)));
        due
    }
}
