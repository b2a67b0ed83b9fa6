// src/replica.rs
//! Client-side order book replica.
//!
//! Mirrors the published market data stream so the trading side can see
//! the same book the exchange is matching against. Nodes live in a
//! `Slab` with FIFO index links per price level; levels sit in per-side
//! ordered maps. The replica trusts the stream — a malformed update here
//! means the consumer's sequencing guarantees were violated upstream.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use slab::Slab;
use smallvec::SmallVec;

use crate::messages::{MarketUpdate, UpdateKind};
use crate::types::*;

type Handle = usize;

#[derive(Clone, Debug)]
struct Node {
    order_id: OrderId,
    price: Price,
    qty: Qty,
    side: Side,
    priority: Priority,
    prev: Option<Handle>,
    next: Option<Handle>,
}

#[derive(Clone, Debug, Default)]
struct Level {
    head: Option<Handle>,
    tail: Option<Handle>,
    total_qty: u64,
    count: usize,
}

/// Best bid/offer with aggregated level quantity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bbo {
    pub bid: Option<(Price, u64)>,
    pub ask: Option<(Price, u64)>,
}

impl std::fmt::Display for Bbo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.bid, self.ask) {
            (Some((bp, bq)), Some((ap, aq))) => write!(f, "{bq}@{bp} x {aq}@{ap}"),
            (Some((bp, bq)), None) => write!(f, "{bq}@{bp} x -"),
            (None, Some((ap, aq))) => write!(f, "- x {aq}@{ap}"),
            (None, None) => write!(f, "- x -"),
        }
    }
}

/// One ticker's replica book.
pub struct ReplicaBook {
    ticker_id: TickerId,
    bids: BTreeMap<Price, Level>,
    asks: BTreeMap<Price, Level>,
    orders: Slab<Node>,
    index: HashMap<OrderId, Handle>,
    bbo: Bbo,
}

impl ReplicaBook {
    pub fn new(ticker_id: TickerId) -> Self {
        Self {
            ticker_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: Slab::new(),
            index: HashMap::new(),
            bbo: Bbo::default(),
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Price, Level> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
            Side::Invalid => panic!("<Replica> level access with INVALID side"),
        }
    }

    /// Fold one published update into the book. Returns true when the
    /// top of book may have moved (callers refresh strategy state then).
    pub fn apply(&mut self, update: &MarketUpdate) -> bool {
        match update.kind {
            UpdateKind::Add => {
                let h = self.orders.insert(Node {
                    order_id: update.order_id,
                    price: update.price,
                    qty: update.qty,
                    side: update.side,
                    priority: update.priority,
                    prev: None,
                    next: None,
                });
                self.index.insert(update.order_id, h);
                let prev_tail = {
                    let lvl = self.levels_mut(update.side).entry(update.price).or_default();
                    let t = lvl.tail;
                    lvl.tail = Some(h);
                    if t.is_none() {
                        lvl.head = Some(h);
                    }
                    lvl.count += 1;
                    lvl.total_qty += u64::from(update.qty);
                    t
                };
                if let Some(t) = prev_tail {
                    self.orders[t].next = Some(h);
                    self.orders[h].prev = Some(t);
                }
            }
            UpdateKind::Modify => {
                let h = *self
                    .index
                    .get(&update.order_id)
                    .unwrap_or_else(|| panic!("<Replica> MODIFY of unknown order: {update}"));
                let (price, side, old_qty) = {
                    let n = &self.orders[h];
                    (n.price, n.side, n.qty)
                };
                assert_eq!(side, update.side, "<Replica> MODIFY changed side: {update}");
                self.orders[h].qty = update.qty;
                if let Some(lvl) = self.levels_mut(side).get_mut(&price) {
                    lvl.total_qty = lvl.total_qty + u64::from(update.qty) - u64::from(old_qty);
                }
            }
            UpdateKind::Cancel => {
                let h = self
                    .index
                    .remove(&update.order_id)
                    .unwrap_or_else(|| panic!("<Replica> CANCEL of unknown order: {update}"));
                self.unlink(h);
            }
            UpdateKind::Trade => {
                // book state already adjusted by the paired MODIFY/CANCEL
                return false;
            }
            UpdateKind::Clear => {
                self.bids.clear();
                self.asks.clear();
                self.orders.clear();
                self.index.clear();
            }
            UpdateKind::Invalid | UpdateKind::SnapshotStart | UpdateKind::SnapshotEnd => {
                panic!("<Replica> unexpected update kind: {update}")
            }
        }
        self.refresh_bbo()
    }

    fn unlink(&mut self, h: Handle) {
        let (price, side, prev, next, qty) = {
            let n = &self.orders[h];
            (n.price, n.side, n.prev, n.next, n.qty)
        };
        if let Some(p) = prev {
            self.orders[p].next = next;
        }
        if let Some(nh) = next {
            self.orders[nh].prev = prev;
        }
        let remove_level = {
            let lvl = self
                .levels_mut(side)
                .get_mut(&price)
                .unwrap_or_else(|| panic!("<Replica> CANCEL hit a missing level {side} @ {price}"));
            if prev.is_none() {
                lvl.head = next;
            }
            if next.is_none() {
                lvl.tail = prev;
            }
            lvl.count -= 1;
            lvl.total_qty -= u64::from(qty);
            lvl.count == 0
        };
        if remove_level {
            self.levels_mut(side).remove(&price);
        }
        self.orders.remove(h);
    }

    fn refresh_bbo(&mut self) -> bool {
        let bid = self.bids.iter().next_back().map(|(p, l)| (*p, l.total_qty));
        let ask = self.asks.iter().next().map(|(p, l)| (*p, l.total_qty));
        let next = Bbo { bid, ask };
        let changed = next != self.bbo;
        self.bbo = next;
        changed
    }

    #[inline]
    pub fn bbo(&self) -> Bbo {
        self.bbo
    }

    pub fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    /// Top `n` levels per side, best first: (price, qty, order count).
    pub fn top_n(&self, n: usize) -> (SmallVec<[(Price, u64, usize); 8]>, SmallVec<[(Price, u64, usize); 8]>) {
        let mut bids = SmallVec::new();
        let mut asks = SmallVec::new();
        for (p, l) in self.bids.iter().rev().take(n) {
            bids.push((*p, l.total_qty, l.count));
        }
        for (p, l) in self.asks.iter().take(n) {
            asks.push((*p, l.total_qty, l.count));
        }
        (bids, asks)
    }

    /// FIFO priorities at one level, head first. Test support.
    #[cfg(test)]
    fn level_priorities(&self, side: Side, price: Price) -> Vec<Priority> {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
            Side::Invalid => panic!(),
        };
        let mut out = Vec::new();
        let Some(lvl) = levels.get(&price) else { return out };
        let mut cur = lvl.head;
        while let Some(h) = cur {
            out.push(self.orders[h].priority);
            cur = self.orders[h].next;
        }
        out
    }
}

/// All per-ticker replicas a trading client mirrors.
pub struct MarketBooks {
    books: Vec<ReplicaBook>,
}

impl MarketBooks {
    pub fn new(n_tickers: usize) -> Self {
        Self {
            books: (0..n_tickers).map(|t| ReplicaBook::new(t as TickerId)).collect(),
        }
    }

    /// Returns the ticker whose top of book changed, if any.
    pub fn apply(&mut self, update: &MarketUpdate) -> Option<TickerId> {
        let ticker = update.ticker_id as usize;
        if ticker >= self.books.len() {
            panic!("<Replica> update for unknown ticker: {update}");
        }
        self.books[ticker].apply(update).then_some(update.ticker_id)
    }

    pub fn book(&self, ticker: TickerId) -> &ReplicaBook {
        &self.books[ticker as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(oid: u64, side: Side, price: Price, qty: Qty, priority: Priority) -> MarketUpdate {
        MarketUpdate {
            kind: UpdateKind::Add,
            order_id: oid,
            ticker_id: 0,
            side,
            price,
            qty,
            priority,
        }
    }

    #[test]
    fn bbo_tracks_adds_and_cancels() {
        let mut b = ReplicaBook::new(0);
        assert!(b.apply(&add(1, Side::Buy, 100, 10, 1)));
        assert!(b.apply(&add(2, Side::Sell, 102, 5, 1)));
        assert_eq!(
            b.bbo(),
            Bbo {
                bid: Some((100, 10)),
                ask: Some((102, 5))
            }
        );

        // deeper bid does not move the top
        assert!(!b.apply(&add(3, Side::Buy, 99, 10, 1)));

        assert!(b.apply(&MarketUpdate {
            kind: UpdateKind::Cancel,
            order_id: 1,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 0,
            priority: 1,
        }));
        assert_eq!(b.bbo().bid, Some((99, 10)));
        assert_eq!(b.order_count(), 2);
    }

    #[test]
    fn modify_adjusts_level_qty() {
        let mut b = ReplicaBook::new(0);
        b.apply(&add(1, Side::Sell, 50, 10, 1));
        b.apply(&add(2, Side::Sell, 50, 20, 2));
        assert_eq!(b.bbo().ask, Some((50, 30)));

        b.apply(&MarketUpdate {
            kind: UpdateKind::Modify,
            order_id: 2,
            ticker_id: 0,
            side: Side::Sell,
            price: 50,
            qty: 5,
            priority: 2,
        });
        assert_eq!(b.bbo().ask, Some((50, 15)));
        assert_eq!(b.level_priorities(Side::Sell, 50), vec![1, 2]);
    }

    #[test]
    fn clear_wipes_the_ticker() {
        let mut b = ReplicaBook::new(0);
        b.apply(&add(1, Side::Buy, 100, 10, 1));
        b.apply(&MarketUpdate {
            kind: UpdateKind::Clear,
            ticker_id: 0,
            ..Default::default()
        });
        assert_eq!(b.bbo(), Bbo::default());
        assert_eq!(b.order_count(), 0);
    }

    #[test]
    fn trade_leaves_book_untouched() {
        let mut b = ReplicaBook::new(0);
        b.apply(&add(1, Side::Sell, 100, 10, 1));
        let changed = b.apply(&MarketUpdate {
            kind: UpdateKind::Trade,
            order_id: ORDER_ID_INVALID,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 3,
            priority: PRIORITY_INVALID,
        });
        assert!(!changed);
        assert_eq!(b.bbo().ask, Some((100, 10)));
    }

    #[test]
    fn fifo_order_is_preserved_within_level() {
        let mut b = ReplicaBook::new(0);
        b.apply(&add(1, Side::Buy, 100, 1, 1));
        b.apply(&add(2, Side::Buy, 100, 1, 2));
        b.apply(&add(3, Side::Buy, 100, 1, 3));
        // cancel the middle one
        b.apply(&MarketUpdate {
            kind: UpdateKind::Cancel,
            order_id: 2,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 0,
            priority: 2,
        });
        assert_eq!(b.level_priorities(Side::Buy, 100), vec![1, 3]);
    }

    #[test]
    fn top_n_reports_best_first() {
        let mut books = MarketBooks::new(2);
        books.apply(&add(1, Side::Buy, 100, 10, 1));
        books.apply(&add(2, Side::Buy, 101, 20, 1));
        books.apply(&add(3, Side::Sell, 103, 5, 1));
        let (bids, asks) = books.book(0).top_n(4);
        assert_eq!(bids.as_slice(), &[(101, 20, 1), (100, 10, 1)]);
        assert_eq!(asks.as_slice(), &[(103, 5, 1)]);
    }
}
