use std::task::Poll;

struct Slot<T> {
    /// Full wheel revolutions left before the entry is due.
    rounds: u64,
    value: T,
}

/// Hashed timing wheel.
///
/// Entries are hashed into `slots` buckets by their due tick; entries due more
/// than one revolution ahead carry a round counter that is decremented each
/// time the cursor passes their bucket.
pub struct TimeWheel<T> {
    cursor: usize,
    slots: Vec<Vec<Slot<T>>>,
}

impl<T> TimeWheel<T> {
    /// Create wheel with `steps` buckets.
    pub fn new(steps: u64) -> Self {
        let steps = steps.max(1) as usize;

        let mut slots = Vec::with_capacity(steps);

        slots.resize_with(steps, Vec::new);

        Self { cursor: 0, slots }
    }

    /// Add `value` due after `ticks` ticks and return the bucket it landed in.
    ///
    /// A zero tick count is treated as one: nothing is ever due on the
    /// current tick.
    pub fn add(&mut self, ticks: u64, value: T) -> usize {
        let ticks = ticks.max(1);
        let steps = self.slots.len() as u64;

        let slot = ((self.cursor as u64 + ticks) % steps) as usize;
        let rounds = (ticks - 1) / steps;

        self.slots[slot].push(Slot { rounds, value });

        slot
    }

    /// Advance the cursor by one bucket and collect the values now due.
    pub fn tick(&mut self) -> Poll<Vec<T>> {
        self.cursor = (self.cursor + 1) % self.slots.len();

        let bucket = std::mem::take(&mut self.slots[self.cursor]);

        let mut ready = vec![];
        let mut waiting = vec![];

        for mut slot in bucket {
            if slot.rounds == 0 {
                ready.push(slot.value);
            } else {
                slot.rounds -= 1;
                waiting.push(slot);
            }
        }

        self.slots[self.cursor] = waiting;

        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    }

    /// Number of entries still on the wheel.
    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }
}

impl<T: PartialEq> TimeWheel<T> {
    /// Remove `value` from bucket `slot`, as returned by [`TimeWheel::add`].
    pub fn remove(&mut self, slot: usize, value: &T) -> bool {
        let Some(bucket) = self.slots.get_mut(slot) else {
            return false;
        };

        match bucket.iter().position(|entry| entry.value == *value) {
            Some(index) => {
                bucket.swap_remove(index);
                true
            }
            None => false,
        }
    }
}
