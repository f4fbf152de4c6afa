//! Position Arena
//!
//! Accumulators for every scheduled position, created before dispatch and
//! never resized afterwards. Results are routed by `(file, offset)`.

use fxhash::FxHashMap;
use lsperf_ipc::SingleMeasurement;
use lsperf_report::PositionBenchmark;

/// Flat storage plus a key index
#[derive(Debug, Default)]
pub struct PositionArena {
    positions: Vec<PositionBenchmark>,
    index: FxHashMap<(String, u32), usize>,
}

impl PositionArena {
    /// Build the arena. A repeated key keeps its first accumulator.
    pub fn new(positions: impl IntoIterator<Item = PositionBenchmark>) -> Self {
        let mut arena = Self::default();
        for position in positions {
            let key = (position.file.clone(), position.offset);
            if arena.index.contains_key(&key) {
                continue;
            }
            arena.index.insert(key, arena.positions.len());
            arena.positions.push(position);
        }
        arena
    }

    /// Number of distinct positions
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Accumulator for a key
    pub fn get(&self, file: &str, offset: u32) -> Option<&PositionBenchmark> {
        self.index
            .get(&(file.to_string(), offset))
            .map(|&slot| &self.positions[slot])
    }

    /// Append a measurement to its position. Returns `false` for unknown keys.
    pub fn record(&mut self, measurement: &SingleMeasurement) -> bool {
        match self
            .index
            .get(&(measurement.file.clone(), measurement.offset))
        {
            Some(&slot) => {
                self.positions[slot].record(measurement);
                true
            }
            None => false,
        }
    }

    /// All positions in creation order
    pub fn positions(&self) -> &[PositionBenchmark] {
        &self.positions
    }

    /// Consume the arena, keeping only positions with at least one trial
    pub fn into_non_empty(self) -> Vec<PositionBenchmark> {
        self.positions
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect()
    }
}
