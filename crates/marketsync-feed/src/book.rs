//! Local order book with sequence tracking.

use marketsync_core::{BookTop, DiffEvent, Level, OrderBookSnapshot, Price, Size};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// What to do with an incoming diff given the local sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffAction {
    /// Already covered by local state (`last <= L`).
    Stale,
    /// Updates between `L` and the event's first id are missing.
    Gap,
    /// Contiguous or overlapping; safe to apply.
    Apply,
}

/// Authoritative order book for one symbol.
///
/// Bids are keyed by `Reverse<Price>` so iteration yields the highest bid
/// first; asks iterate lowest first. Levels with size <= 0 are never
/// stored.
#[derive(Debug, Clone)]
pub struct OrderBookState {
    symbol: String,
    last_sequence_id: u64,
    bids: BTreeMap<Reverse<Price>, Size>,
    asks: BTreeMap<Price, Size>,
}

impl OrderBookState {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last_sequence_id: 0,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_sequence_id(&self) -> u64 {
        self.last_sequence_id
    }

    /// Replace the whole book with a REST snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &OrderBookSnapshot) {
        self.bids.clear();
        self.asks.clear();

        for level in snapshot.bids.iter().filter(|l| !l.is_removal()) {
            self.bids.insert(Reverse(level.price), level.size);
        }
        for level in snapshot.asks.iter().filter(|l| !l.is_removal()) {
            self.asks.insert(level.price, level.size);
        }

        self.last_sequence_id = snapshot.last_sequence_id;
    }

    /// Drop all levels and forget the sequence id.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_sequence_id = 0;
    }

    pub fn classify(&self, event: &DiffEvent) -> DiffAction {
        if event.last_sequence_id <= self.last_sequence_id {
            DiffAction::Stale
        } else if event.first_sequence_id > self.last_sequence_id + 1 {
            DiffAction::Gap
        } else {
            DiffAction::Apply
        }
    }

    /// Apply a diff. Callers check `classify` first; stale events are
    /// ignored here as well so replay never mutates state.
    pub fn apply(&mut self, event: &DiffEvent) {
        if event.last_sequence_id <= self.last_sequence_id {
            return;
        }

        for level in &event.bids {
            if level.is_removal() {
                self.bids.remove(&Reverse(level.price));
            } else {
                self.bids.insert(Reverse(level.price), level.size);
            }
        }
        for level in &event.asks {
            if level.is_removal() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.size);
            }
        }

        self.last_sequence_id = event.last_sequence_id;
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.bids
            .iter()
            .next()
            .map(|(Reverse(price), size)| Level::new(*price, *size))
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks
            .iter()
            .next()
            .map(|(price, size)| Level::new(*price, *size))
    }

    pub fn top(&self) -> BookTop {
        BookTop {
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
        }
    }

    /// Bids, highest price first.
    pub fn bids(&self) -> impl Iterator<Item = Level> + '_ {
        self.bids
            .iter()
            .map(|(Reverse(price), size)| Level::new(*price, *size))
    }

    /// Asks, lowest price first.
    pub fn asks(&self) -> impl Iterator<Item = Level> + '_ {
        self.asks
            .iter()
            .map(|(price, size)| Level::new(*price, *size))
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Deep copy for publishing, optionally capped to `depth` levels per side.
    pub fn view(&self, depth: Option<usize>) -> OrderBookView {
        let depth = depth.unwrap_or(usize::MAX);
        OrderBookView {
            symbol: self.symbol.clone(),
            last_sequence_id: self.last_sequence_id,
            bids: self.bids().take(depth).collect(),
            asks: self.asks().take(depth).collect(),
        }
    }
}

/// Immutable copy of an order book handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookView {
    pub symbol: String,
    pub last_sequence_id: u64,
    /// Highest price first.
    pub bids: Vec<Level>,
    /// Lowest price first.
    pub asks: Vec<Level>,
}

impl OrderBookView {
    pub fn top(&self) -> BookTop {
        BookTop {
            best_bid: self.bids.first().copied(),
            best_ask: self.asks.first().copied(),
        }
    }
}
