// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Aggregate progress across the metadata and tile phases.
//!
//! The first half of the bar tracks the server job (`server / 2`), the second
//! half tracks tile downloads (`0.5 + completed / total / 2`). Poll responses
//! may arrive out of order, so the reported value only ever moves forward.

/// Combined 0..=1 progress for one flight.
#[derive(Debug, Clone, Default)]
pub struct AggregateProgress {
    value: f64,
    tiles: Option<TileCounter>,
}

#[derive(Debug, Clone)]
struct TileCounter {
    seen: Vec<bool>,
    completed: usize,
}

impl AggregateProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Whether the bar has reached the end.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.tiles
            .as_ref()
            .is_some_and(|t| t.completed == t.seen.len())
    }

    /// Record a server-reported job fraction. Ignored once tiles started.
    pub fn on_server_progress(&mut self, progress: f64) -> f64 {
        if self.tiles.is_none() && progress.is_finite() {
            self.advance(progress.clamp(0.0, 1.0) / 2.0);
        }
        self.value
    }

    /// Enter the tile phase with `total` tiles to download.
    pub fn start_tiles(&mut self, total: usize) -> f64 {
        self.tiles = Some(TileCounter {
            seen: vec![false; total],
            completed: 0,
        });
        self.advance(if total == 0 { 1.0 } else { 0.5 });
        self.value
    }

    /// Record that the tile at `index` produced a result (success or failure).
    ///
    /// Each index counts once; repeats and unknown indices are ignored.
    pub fn on_tile_done(&mut self, index: usize) -> f64 {
        let Some(tiles) = self.tiles.as_mut() else {
            return self.value;
        };
        if let Some(seen) = tiles.seen.get_mut(index) {
            if !*seen {
                *seen = true;
                tiles.completed += 1;
            }
        }
        let fraction = ratio(tiles.completed, tiles.seen.len());
        self.advance(0.5 + fraction / 2.0);
        self.value
    }

    fn advance(&mut self, candidate: f64) {
        if candidate > self.value {
            self.value = candidate.min(1.0);
        }
    }
}

#[allow(clippy::cast_precision_loss, reason = "tile counts are far below 2^52")]
fn ratio(completed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        completed as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_progress_is_halved() {
        let mut progress = AggregateProgress::new();
        assert!((progress.on_server_progress(0.4) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_order_polls_do_not_regress() {
        let mut progress = AggregateProgress::new();
        progress.on_server_progress(0.6);
        progress.on_server_progress(0.3);
        assert!((progress.value() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_tiles_reach_one() {
        let mut progress = AggregateProgress::new();
        progress.on_server_progress(1.0);
        assert!((progress.start_tiles(4) - 0.5).abs() < 1e-12);

        progress.on_tile_done(2);
        assert!((progress.value() - 0.625).abs() < 1e-12);
        progress.on_tile_done(0);
        progress.on_tile_done(3);
        assert!(!progress.is_done());
        progress.on_tile_done(1);

        assert!((progress.value() - 1.0).abs() < f64::EPSILON);
        assert!(progress.is_done());
    }

    #[test]
    fn test_repeated_tile_counts_once() {
        let mut progress = AggregateProgress::new();
        progress.start_tiles(2);
        progress.on_tile_done(1);
        progress.on_tile_done(1);
        progress.on_tile_done(7);
        assert!((progress.value() - 0.75).abs() < 1e-12);
        assert!(!progress.is_done());
    }

    #[test]
    fn test_no_tiles_is_done() {
        let mut progress = AggregateProgress::new();
        assert!((progress.start_tiles(0) - 1.0).abs() < f64::EPSILON);
        assert!(progress.is_done());
    }

    #[test]
    fn test_server_progress_ignored_after_tiles_start() {
        let mut progress = AggregateProgress::new();
        progress.start_tiles(3);
        progress.on_server_progress(0.1);
        assert!((progress.value() - 0.5).abs() < 1e-12);
    }
}
