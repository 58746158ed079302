//! Cooperative pacing: yield to the scheduler every `RESPIRATION_RATE`
//! items materialized by `find`/`get_many`/the index scan path/index
//! rebuild. Suspension points besides KV calls and the schema lock's
//! sleep are only this yield; nothing else in the crate suspends.

pub const RESPIRATION_RATE: usize = 250;

/// Counts materialized items and yields every `RESPIRATION_RATE` of them.
/// A fresh `Pacer` per call to `find`/`get_many`/etc. keeps the count
/// local to that operation, matching "every 250 items materialized"
/// rather than a process-wide counter.
#[derive(Debug, Default)]
pub struct Pacer {
    count: usize,
}

impl Pacer {
    pub fn new() -> Pacer {
        Pacer::default()
    }

    /// Call once per materialized item. Yields to the async scheduler
    /// whenever the running count crosses a multiple of
    /// `RESPIRATION_RATE`.
    pub async fn tick(&mut self) {
        self.count += 1;
        if self.count % RESPIRATION_RATE == 0 {
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod pace_test {
    use super::*;

    #[tokio::test]
    async fn test_tick_counts() {
        let mut pacer = Pacer::new();
        for _ in 0..RESPIRATION_RATE * 2 + 3 {
            pacer.tick().await;
        }
        assert_eq!(pacer.count, RESPIRATION_RATE * 2 + 3);
    }
}
