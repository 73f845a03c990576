//! Fixed-capacity window of candlesticks keyed by open time.

use marketsync_core::{Candle, CandleInterval};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleAction {
    /// Opens before the newest local candle.
    Stale,
    /// Update to the newest local candle.
    Replace,
    /// Opens exactly one interval after the newest local candle.
    Append,
    /// Opens further ahead; candles are missing in between.
    Gap,
}

#[derive(Debug, Clone)]
pub struct CandleWindowState {
    symbol: String,
    interval: CandleInterval,
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl CandleWindowState {
    pub fn new(symbol: impl Into<String>, interval: CandleInterval, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            symbol: symbol.into(),
            interval,
            capacity,
            candles: VecDeque::with_capacity(capacity),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> CandleInterval {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Replace the window with fetched history, keeping the newest
    /// `capacity` candles.
    pub fn reset_with(&mut self, mut history: Vec<Candle>) {
        history.sort_by_key(|c| c.open_time_ms);
        history.dedup_by_key(|c| c.open_time_ms);
        let skip = history.len().saturating_sub(self.capacity);

        self.candles.clear();
        self.candles.extend(history.into_iter().skip(skip));
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }

    pub fn classify(&self, candle: &Candle) -> CandleAction {
        let Some(latest) = self.candles.back() else {
            return CandleAction::Append;
        };
        let next_open = latest.open_time_ms + self.interval.duration_ms();

        if candle.open_time_ms < latest.open_time_ms {
            CandleAction::Stale
        } else if candle.open_time_ms == latest.open_time_ms {
            CandleAction::Replace
        } else if candle.open_time_ms == next_open {
            CandleAction::Append
        } else {
            CandleAction::Gap
        }
    }

    /// Apply a `Replace` or `Append`. Other actions leave the window untouched.
    pub fn apply(&mut self, candle: Candle) -> CandleAction {
        let action = self.classify(&candle);
        match action {
            CandleAction::Replace => {
                if let Some(latest) = self.candles.back_mut() {
                    *latest = candle;
                }
            }
            CandleAction::Append => {
                if self.candles.len() >= self.capacity {
                    self.candles.pop_front();
                }
                self.candles.push_back(candle);
            }
            CandleAction::Stale | CandleAction::Gap => {}
        }
        action
    }

    pub fn snapshot(&self) -> Arc<[Candle]> {
        self.candles.iter().cloned().collect()
    }
}
