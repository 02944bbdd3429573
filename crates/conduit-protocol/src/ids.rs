// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Generates request ids unique within one process run.
///
/// Combines a monotonic counter with a random UUID so that even under
/// concurrent allocation from many threads, two calls never collide —
/// the counter alone would require a global lock to guarantee ordering,
/// but uniqueness only needs the pair to differ, which an `AtomicU64`
/// fetch-add already guarantees without contention.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{n:016x}-{}", Uuid::new_v4().simple())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn sequential_ids_are_unique() {
        let gen = RequestIdGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..100_000 {
            assert!(seen.insert(gen.next()));
        }
    }

    #[test]
    fn concurrent_ids_are_unique() {
        let gen = Arc::new(RequestIdGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let gen = gen.clone();
            handles.push(std::thread::spawn(move || {
                (0..10_000).map(|_| gen.next()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate request id generated");
            }
        }
        assert_eq!(seen.len(), 16 * 10_000);
    }
}
