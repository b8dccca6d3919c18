use std::sync::atomic::{AtomicU64, Ordering};

use crate::Collection;

/// Per-collection invalidation counters shared by the writer and reader lanes.
///
/// The writer bumps a counter after committing a destructive change and before
/// acknowledging it. The reader compares the counter with the value its handle
/// was opened at before serving each read, and reopens on mismatch.
#[derive(Debug, Default)]
pub struct Generations {
    counters: [AtomicU64; 2],
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, collection: Collection) -> u64 {
        self.counters[collection.index()].load(Ordering::Acquire)
    }

    /// Returns the new generation.
    pub fn bump(&self, collection: Collection) -> u64 {
        self.counters[collection.index()].fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unit_bump_is_per_collection() {
        let generations = Generations::new();
        assert_eq!(generations.bump(Collection::Email), 1);
        assert_eq!(generations.bump(Collection::Email), 2);
        assert_eq!(generations.current(Collection::Email), 2);
        assert_eq!(generations.current(Collection::Memory), 0);
    }

    #[test]
    fn functional_bumps_from_another_thread_are_visible() {
        let generations = Arc::new(Generations::new());
        let writer = Arc::clone(&generations);
        std::thread::spawn(move || {
            writer.bump(Collection::Memory);
        })
        .join()
        .expect("join writer");
        assert_eq!(generations.current(Collection::Memory), 1);
    }
}
