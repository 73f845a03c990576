//! Fixed-capacity window of recent trades with contiguous ids.

use marketsync_core::Trade;
use std::collections::VecDeque;
use std::sync::Arc;

/// What to do with an incoming trade given the newest local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    /// Id already in (or before) the window.
    Stale,
    /// Trades between the newest local id and this one are missing.
    Gap,
    /// Next id in sequence, or the first trade of an empty window.
    Append,
}

/// FIFO of the most recent trades. Ids within the window are contiguous
/// and increasing; inserting past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct TradeWindowState {
    symbol: String,
    capacity: usize,
    trades: VecDeque<Trade>,
}

impl TradeWindowState {
    /// `capacity` is clamped to at least one entry.
    pub fn new(symbol: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            symbol: symbol.into(),
            capacity,
            trades: VecDeque::with_capacity(capacity),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn last_id(&self) -> Option<u64> {
        self.trades.back().map(|t| t.id)
    }

    /// Replace the window with fetched history.
    ///
    /// Keeps the newest contiguous run of ids, at most `capacity` long.
    pub fn reset_with(&mut self, mut history: Vec<Trade>) {
        history.sort_by_key(|t| t.id);
        history.dedup_by_key(|t| t.id);

        let mut start = history.len();
        while start > 0 && history.len() - start < self.capacity {
            let contiguous = start == history.len()
                || history[start - 1].id + 1 == history[start].id;
            if !contiguous {
                break;
            }
            start -= 1;
        }

        self.trades.clear();
        self.trades.extend(history.drain(start..));
    }

    pub fn clear(&mut self) {
        self.trades.clear();
    }

    pub fn classify(&self, trade: &Trade) -> TradeAction {
        match self.last_id() {
            None => TradeAction::Append,
            Some(last) if trade.id <= last => TradeAction::Stale,
            Some(last) if trade.id == last + 1 => TradeAction::Append,
            Some(_) => TradeAction::Gap,
        }
    }

    /// Append the next trade, returning the evicted one when full.
    /// Callers check `classify` first.
    pub fn push(&mut self, trade: Trade) -> Option<Trade> {
        let evicted = if self.trades.len() >= self.capacity {
            self.trades.pop_front()
        } else {
            None
        };
        self.trades.push_back(trade);
        evicted
    }

    /// Oldest first.
    pub fn trades(&self) -> impl Iterator<Item = &Trade> + '_ {
        self.trades.iter()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.trades.iter().map(|t| t.id).collect()
    }

    /// Deep copy for publishing.
    pub fn snapshot(&self) -> Arc<[Trade]> {
        self.trades.iter().cloned().collect()
    }
}
