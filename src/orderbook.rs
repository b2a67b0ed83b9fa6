// src/orderbook.rs
//! Exchange-side limit order book with price-time-priority matching.
//!
//! One book per ticker. Nodes live in a fixed [`Pool`] and are linked into
//! per-level FIFO lists by pool index; price levels are kept in per-side
//! ordered maps so the most aggressive level is always the first (asks) or
//! last (bids) key. Matching walks best-price-first, head-first, emitting
//! client responses and market updates into the engine's outbound queues
//! as it goes.

use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;

use crate::messages::{
    ClientRequest, ClientResponse, MarketUpdate, ResponseKind, UpdateKind,
};
use crate::pool::{Pool, PoolIdx, NULL_IDX};
use crate::spsc::SpscQueue;
use crate::types::*;

/// A resting order. `prev`/`next` are FIFO links within its price level.
#[derive(Clone, Copy, Debug)]
pub struct OrderNode {
    pub ticker_id: TickerId,
    pub client_id: ClientId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
    prev: PoolIdx,
    next: PoolIdx,
}

/// All resting orders at one (side, price), FIFO by insertion.
#[derive(Clone, Copy, Debug)]
struct Level {
    head: PoolIdx,
    tail: PoolIdx,
    count: usize,
    total_qty: u64,
}

pub struct OrderBook {
    ticker_id: TickerId,
    orders: Pool<OrderNode>,
    bids: std::collections::BTreeMap<Price, Level>,
    asks: std::collections::BTreeMap<Price, Level>,
    // (owning client, client order id) -> live node
    lookup: HashMap<(ClientId, OrderId), PoolIdx>,
    next_market_oid: OrderId,
    tx_responses: Arc<SpscQueue<ClientResponse>>,
    tx_updates: Arc<SpscQueue<MarketUpdate>>,
}

impl OrderBook {
    pub fn new(
        ticker_id: TickerId,
        order_capacity: usize,
        tx_responses: Arc<SpscQueue<ClientResponse>>,
        tx_updates: Arc<SpscQueue<MarketUpdate>>,
    ) -> Self {
        Self {
            ticker_id,
            orders: Pool::new("book-orders", order_capacity),
            bids: std::collections::BTreeMap::new(),
            asks: std::collections::BTreeMap::new(),
            lookup: HashMap::new(),
            next_market_oid: 1,
            tx_responses,
            tx_updates,
        }
    }

    /// Add a new order: acknowledge, match against the opposite side, and
    /// rest any residual quantity.
    pub fn add(
        &mut self,
        client_id: ClientId,
        client_oid: OrderId,
        ticker_id: TickerId,
        side: Side,
        price: Price,
        qty: Qty,
    ) {
        let new_market_oid = self.next_market_oid;
        self.next_market_oid += 1;

        self.send_response(ClientResponse {
            kind: ResponseKind::Accepted,
            client_id,
            ticker_id,
            client_order_id: client_oid,
            market_order_id: new_market_oid,
            side,
            price,
            qty_exec: 0,
            qty_remain: qty,
        });

        let qty_remains =
            self.find_match(client_id, client_oid, ticker_id, side, price, qty, new_market_oid);

        if qty_remains > 0 {
            let priority = self.next_priority(side, price);
            let idx = self.orders.alloc(OrderNode {
                ticker_id,
                client_id,
                client_order_id: client_oid,
                market_order_id: new_market_oid,
                side,
                price,
                qty: qty_remains,
                priority,
                prev: NULL_IDX,
                next: NULL_IDX,
            });
            self.link_order(idx);
            self.send_update(MarketUpdate {
                kind: UpdateKind::Add,
                order_id: new_market_oid,
                ticker_id,
                side,
                price,
                qty: qty_remains,
                priority,
            });
        }
    }

    /// Cancel a resting order, or reject when `(client, client order id)`
    /// maps to nothing live. The reject deliberately carries `QTY_INVALID`
    /// in both quantity fields.
    pub fn cancel(&mut self, client_id: ClientId, client_oid: OrderId, ticker_id: TickerId) {
        let response = match self.lookup.get(&(client_id, client_oid)).copied() {
            None => ClientResponse {
                kind: ResponseKind::CancelRejected,
                client_id,
                ticker_id,
                client_order_id: client_oid,
                market_order_id: ORDER_ID_INVALID,
                side: Side::Invalid,
                price: PRICE_INVALID,
                qty_exec: QTY_INVALID,
                qty_remain: QTY_INVALID,
            },
            Some(idx) => {
                let node = *self.orders.get(idx);
                self.send_update(MarketUpdate {
                    kind: UpdateKind::Cancel,
                    order_id: node.market_order_id,
                    ticker_id,
                    side: node.side,
                    price: node.price,
                    qty: 0,
                    priority: node.priority,
                });
                self.unlink_order(idx);
                ClientResponse {
                    kind: ResponseKind::Cancelled,
                    client_id,
                    ticker_id,
                    client_order_id: client_oid,
                    market_order_id: node.market_order_id,
                    side: node.side,
                    price: node.price,
                    qty_exec: QTY_INVALID,
                    qty_remain: node.qty,
                }
            }
        };
        // The client hears back either way
        self.send_response(response);
    }

    /// Dispatch one request. Any kind the book does not understand is a
    /// programmer error upstream.
    pub fn process(&mut self, req: &ClientRequest) {
        use crate::messages::RequestKind;
        match req.kind {
            RequestKind::New => {
                self.add(req.client_id, req.order_id, req.ticker_id, req.side, req.price, req.qty)
            }
            RequestKind::Cancel => self.cancel(req.client_id, req.order_id, req.ticker_id),
            RequestKind::Invalid => panic!("<OrderBook> invalid request kind: {req}"),
        }
    }

    // ---- matching ----

    #[allow(clippy::too_many_arguments)]
    fn find_match(
        &mut self,
        client_id: ClientId,
        client_oid: OrderId,
        ticker_id: TickerId,
        side: Side,
        price: Price,
        qty: Qty,
        new_market_oid: OrderId,
    ) -> Qty {
        let mut qty_remains = qty;
        loop {
            if qty_remains == 0 {
                break;
            }
            // Best opposite level, inclusive cross
            let best = match side {
                Side::Buy => self.asks.keys().next().copied().filter(|p| *p <= price),
                Side::Sell => self.bids.keys().next_back().copied().filter(|p| *p >= price),
                Side::Invalid => panic!("<OrderBook> match with INVALID side"),
            };
            let Some(passive_price) = best else { break };
            self.match_head(
                client_id,
                client_oid,
                ticker_id,
                side,
                new_market_oid,
                passive_price,
                &mut qty_remains,
            );
        }
        qty_remains
    }

    /// Fill against the FIFO head of the opposite level at `passive_price`.
    #[allow(clippy::too_many_arguments)]
    fn match_head(
        &mut self,
        client_id: ClientId,
        client_oid: OrderId,
        ticker_id: TickerId,
        side: Side,
        new_market_oid: OrderId,
        passive_price: Price,
        qty_remains: &mut Qty,
    ) {
        let head = {
            let level = self.level(side.opposite(), passive_price);
            level.head
        };
        let order_qty_before = self.orders.get(head).qty;
        let fill = (*qty_remains).min(order_qty_before);

        *qty_remains -= fill;
        {
            let node = self.orders.get_mut(head);
            node.qty -= fill;
        }
        {
            let level = self.level_mut(side.opposite(), passive_price);
            level.total_qty -= u64::from(fill);
        }
        let passive = *self.orders.get(head);

        // Both sides of the trade hear about the fill; the trade prints at
        // the passive order's price.
        self.send_response(ClientResponse {
            kind: ResponseKind::Filled,
            client_id,
            ticker_id,
            client_order_id: client_oid,
            market_order_id: new_market_oid,
            side,
            price: passive.price,
            qty_exec: fill,
            qty_remain: *qty_remains,
        });
        self.send_response(ClientResponse {
            kind: ResponseKind::Filled,
            client_id: passive.client_id,
            ticker_id,
            client_order_id: passive.client_order_id,
            market_order_id: passive.market_order_id,
            side: passive.side,
            price: passive.price,
            qty_exec: fill,
            qty_remain: passive.qty,
        });
        self.send_update(MarketUpdate {
            kind: UpdateKind::Trade,
            order_id: ORDER_ID_INVALID,
            ticker_id,
            side,
            price: passive.price,
            qty: fill,
            priority: PRIORITY_INVALID,
        });

        if passive.qty == 0 {
            // Fully taken: the market sees the passive order disappear
            self.send_update(MarketUpdate {
                kind: UpdateKind::Cancel,
                order_id: passive.market_order_id,
                ticker_id,
                side: passive.side,
                price: passive.price,
                qty: order_qty_before,
                priority: PRIORITY_INVALID,
            });
            self.unlink_order(head);
        } else {
            self.send_update(MarketUpdate {
                kind: UpdateKind::Modify,
                order_id: passive.market_order_id,
                ticker_id,
                side: passive.side,
                price: passive.price,
                qty: passive.qty,
                priority: passive.priority,
            });
        }
    }

    // ---- level & link maintenance ----

    fn levels(&self, side: Side) -> &std::collections::BTreeMap<Price, Level> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
            Side::Invalid => panic!("<OrderBook> level access with INVALID side"),
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut std::collections::BTreeMap<Price, Level> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
            Side::Invalid => panic!("<OrderBook> level access with INVALID side"),
        }
    }

    fn level(&self, side: Side, price: Price) -> &Level {
        self.levels(side)
            .get(&price)
            .unwrap_or_else(|| panic!("<OrderBook> missing level {side} @ {price}"))
    }

    fn level_mut(&mut self, side: Side, price: Price) -> &mut Level {
        self.levels_mut(side)
            .get_mut(&price)
            .unwrap_or_else(|| panic!("<OrderBook> missing level {side} @ {price}"))
    }

    /// FIFO position the next resting order at (side, price) would take.
    fn next_priority(&self, side: Side, price: Price) -> Priority {
        match self.levels(side).get(&price) {
            None => 1,
            Some(level) => self.orders.get(level.tail).priority + 1,
        }
    }

    fn link_order(&mut self, idx: PoolIdx) {
        let (side, price, qty) = {
            let n = self.orders.get(idx);
            (n.side, n.price, n.qty)
        };
        let prev_tail = match self.levels_mut(side).get_mut(&price) {
            Some(level) => {
                let t = level.tail;
                level.tail = idx;
                level.count += 1;
                level.total_qty += u64::from(qty);
                t
            }
            None => {
                self.levels_mut(side).insert(
                    price,
                    Level {
                        head: idx,
                        tail: idx,
                        count: 1,
                        total_qty: u64::from(qty),
                    },
                );
                NULL_IDX
            }
        };
        if prev_tail != NULL_IDX {
            self.orders.get_mut(prev_tail).next = idx;
            self.orders.get_mut(idx).prev = prev_tail;
        }
        let key = {
            let n = self.orders.get(idx);
            (n.client_id, n.client_order_id)
        };
        debug!(
            "<OrderBook> ticker {} rest {}",
            self.ticker_id,
            self.orders.get(idx).market_order_id
        );
        self.lookup.insert(key, idx);
    }

    fn unlink_order(&mut self, idx: PoolIdx) {
        let node = *self.orders.get(idx);
        if node.prev != NULL_IDX {
            self.orders.get_mut(node.prev).next = node.next;
        }
        if node.next != NULL_IDX {
            self.orders.get_mut(node.next).prev = node.prev;
        }
        let remove_level = {
            let level = self.level_mut(node.side, node.price);
            if level.head == idx {
                level.head = node.next;
            }
            if level.tail == idx {
                level.tail = node.prev;
            }
            level.count -= 1;
            level.total_qty -= u64::from(node.qty);
            level.count == 0
        };
        if remove_level {
            // A level exists iff it holds at least one order
            self.levels_mut(node.side).remove(&node.price);
        }
        self.lookup.remove(&(node.client_id, node.client_order_id));
        self.orders.free(idx);
    }

    // ---- accessors ----

    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    /// Aggregate (qty, order count) at a price level; zeros when absent.
    pub fn depth(&self, side: Side, price: Price) -> (u64, usize) {
        self.levels(side)
            .get(&price)
            .map(|l| (l.total_qty, l.count))
            .unwrap_or((0, 0))
    }

    pub fn order_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn orders_in_use(&self) -> usize {
        self.orders.in_use()
    }

    fn send_response(&self, response: ClientResponse) {
        if self.tx_responses.push(response).is_err() {
            panic!("<OrderBook> client response queue overflow");
        }
    }

    fn send_update(&self, update: MarketUpdate) {
        if self.tx_updates.push(update).is_err() {
            panic!("<OrderBook> market update queue overflow");
        }
    }

    /// Walk every level and assert the book invariants. Test-path only;
    /// the hot path relies on them instead of re-checking.
    pub fn validate(&self) {
        for (side, levels) in [(Side::Buy, &self.bids), (Side::Sell, &self.asks)] {
            for (price, level) in levels {
                assert!(level.count > 0, "empty level {side} @ {price}");
                let mut idx = level.head;
                let mut seen = 0usize;
                let mut qty_sum = 0u64;
                let mut last_priority = 0;
                let mut prev = NULL_IDX;
                while idx != NULL_IDX {
                    let n = self.orders.get(idx);
                    assert_eq!(n.side, side);
                    assert_eq!(n.price, *price);
                    assert_eq!(n.prev, prev, "broken back-link at {side} @ {price}");
                    assert!(n.priority > last_priority, "priority not FIFO-increasing");
                    assert_eq!(
                        self.lookup.get(&(n.client_id, n.client_order_id)),
                        Some(&idx),
                        "lookup disagrees with level membership"
                    );
                    last_priority = n.priority;
                    qty_sum += u64::from(n.qty);
                    seen += 1;
                    prev = idx;
                    idx = n.next;
                }
                assert_eq!(seen, level.count);
                assert_eq!(qty_sum, level.total_qty);
                assert_eq!(level.tail, prev);
            }
        }
        assert_eq!(
            self.lookup.len(),
            self.orders.in_use(),
            "lookup count disagrees with pool usage"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RequestKind;

    fn book() -> (
        OrderBook,
        Arc<SpscQueue<ClientResponse>>,
        Arc<SpscQueue<MarketUpdate>>,
    ) {
        let responses = Arc::new(SpscQueue::new(256));
        let updates = Arc::new(SpscQueue::new(256));
        let b = OrderBook::new(3, 64, responses.clone(), updates.clone());
        (b, responses, updates)
    }

    fn drain<T>(q: &SpscQueue<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(v) = q.pop() {
            out.push(v);
        }
        out
    }

    #[test]
    fn passive_add_rests_and_publishes() {
        let (mut b, responses, updates) = book();
        b.add(12, 1, 3, Side::Buy, 100, 50);
        b.validate();

        let rs = drain(&responses);
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].kind, ResponseKind::Accepted);
        assert_eq!(rs[0].market_order_id, 1);
        assert_eq!(rs[0].qty_exec, 0);
        assert_eq!(rs[0].qty_remain, 50);

        let us = drain(&updates);
        assert_eq!(us.len(), 1);
        assert_eq!(us[0].kind, UpdateKind::Add);
        assert_eq!(us[0].order_id, 1);
        assert_eq!(us[0].side, Side::Buy);
        assert_eq!(us[0].price, 100);
        assert_eq!(us[0].qty, 50);
        assert_eq!(us[0].priority, 1);

        assert_eq!(b.best_bid(), Some(100));
        assert_eq!(b.bid_levels(), 1);
    }

    #[test]
    fn cancel_only_order_empties_book() {
        let (mut b, responses, updates) = book();
        b.add(12, 1, 3, Side::Buy, 100, 50);
        drain(&responses);
        drain(&updates);

        b.cancel(12, 1, 3);
        b.validate();

        let rs = drain(&responses);
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].kind, ResponseKind::Cancelled);
        assert_eq!(rs[0].market_order_id, 1);
        assert_eq!(rs[0].price, 100);
        assert_eq!(rs[0].qty_exec, QTY_INVALID);
        assert_eq!(rs[0].qty_remain, 50);

        let us = drain(&updates);
        assert_eq!(us.len(), 1);
        assert_eq!(us[0].kind, UpdateKind::Cancel);
        assert_eq!(us[0].price, 100);

        assert_eq!(b.bid_levels(), 0);
        assert_eq!(b.order_count(), 0);
        assert_eq!(b.orders_in_use(), 0);
    }

    #[test]
    fn cancel_unknown_is_rejected_with_invalid_qty() {
        let (mut b, responses, _updates) = book();
        b.cancel(5, 9, 3);
        let rs = drain(&responses);
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].kind, ResponseKind::CancelRejected);
        assert_eq!(rs[0].market_order_id, ORDER_ID_INVALID);
        assert_eq!(rs[0].qty_exec, QTY_INVALID);
        assert_eq!(rs[0].qty_remain, QTY_INVALID);
        assert_eq!(rs[0].side, Side::Invalid);
    }

    #[test]
    fn partial_match_modifies_passive_order() {
        let (mut b, responses, updates) = book();
        // passive SELL 100@100 -> mid 1
        b.add(7, 1, 3, Side::Sell, 100, 100);
        drain(&responses);
        drain(&updates);

        b.add(3, 1, 3, Side::Buy, 100, 50);
        b.validate();

        let rs = drain(&responses);
        assert_eq!(rs.len(), 3);
        assert_eq!(rs[0].kind, ResponseKind::Accepted);
        // aggressor fill
        assert_eq!(rs[1].kind, ResponseKind::Filled);
        assert_eq!(rs[1].client_id, 3);
        assert_eq!(rs[1].qty_exec, 50);
        assert_eq!(rs[1].qty_remain, 0);
        assert_eq!(rs[1].price, 100);
        // passive fill
        assert_eq!(rs[2].kind, ResponseKind::Filled);
        assert_eq!(rs[2].client_id, 7);
        assert_eq!(rs[2].qty_exec, 50);
        assert_eq!(rs[2].qty_remain, 50);

        let us = drain(&updates);
        assert_eq!(us.len(), 2);
        assert_eq!(us[0].kind, UpdateKind::Trade);
        assert_eq!(us[0].price, 100);
        assert_eq!(us[0].qty, 50);
        assert_eq!(us[0].side, Side::Buy);
        assert_eq!(us[0].order_id, ORDER_ID_INVALID);
        assert_eq!(us[1].kind, UpdateKind::Modify);
        assert_eq!(us[1].order_id, 1);
        assert_eq!(us[1].qty, 50);

        assert_eq!(b.depth(Side::Sell, 100), (50, 1));
    }

    #[test]
    fn aggressive_sweep_across_levels() {
        let (mut b, responses, updates) = book();
        b.add(1, 1, 3, Side::Sell, 100, 100); // mid 1
        b.add(2, 1, 3, Side::Sell, 102, 100); // mid 2
        drain(&responses);
        drain(&updates);

        b.add(9, 1, 3, Side::Buy, 102, 225);
        b.validate();

        let us = drain(&updates);
        let kinds: Vec<_> = us.iter().map(|u| u.kind).collect();
        assert_eq!(
            kinds,
            vec![
                UpdateKind::Trade,
                UpdateKind::Cancel,
                UpdateKind::Trade,
                UpdateKind::Cancel,
                UpdateKind::Add,
            ]
        );
        assert_eq!(us[0].price, 100);
        assert_eq!(us[0].qty, 100);
        assert_eq!(us[1].order_id, 1);
        assert_eq!(us[2].price, 102);
        assert_eq!(us[2].qty, 100);
        assert_eq!(us[3].order_id, 2);
        // residual 25 rests at 102
        assert_eq!(us[4].side, Side::Buy);
        assert_eq!(us[4].price, 102);
        assert_eq!(us[4].qty, 25);

        assert_eq!(b.best_bid(), Some(102));
        assert_eq!(b.ask_levels(), 0);
    }

    #[test]
    fn trade_prints_at_passive_price() {
        let (mut b, responses, updates) = book();
        b.add(1, 1, 3, Side::Sell, 95, 10);
        drain(&responses);
        drain(&updates);

        // aggressive buy limit above the passive price
        b.add(2, 1, 3, Side::Buy, 105, 10);
        let us = drain(&updates);
        assert_eq!(us[0].kind, UpdateKind::Trade);
        assert_eq!(us[0].price, 95);
        let rs = drain(&responses);
        for r in rs.iter().filter(|r| r.kind == ResponseKind::Filled) {
            assert_eq!(r.price, 95);
        }
    }

    #[test]
    fn fifo_priority_within_level() {
        let (mut b, responses, updates) = book();
        b.add(1, 1, 3, Side::Sell, 100, 10); // mid 1, priority 1
        b.add(2, 1, 3, Side::Sell, 100, 10); // mid 2, priority 2
        b.add(3, 1, 3, Side::Sell, 100, 10); // mid 3, priority 3
        drain(&responses);
        let us = drain(&updates);
        assert_eq!(us.iter().map(|u| u.priority).collect::<Vec<_>>(), vec![1, 2, 3]);

        b.add(4, 1, 3, Side::Buy, 100, 15);
        let rs = drain(&responses);
        let passive_fills: Vec<_> = rs
            .iter()
            .filter(|r| r.kind == ResponseKind::Filled && r.client_id != 4)
            .collect();
        // order 1 filled completely first, then order 2 partially
        assert_eq!(passive_fills[0].market_order_id, 1);
        assert_eq!(passive_fills[0].qty_exec, 10);
        assert_eq!(passive_fills[1].market_order_id, 2);
        assert_eq!(passive_fills[1].qty_exec, 5);
        b.validate();
    }

    #[test]
    fn market_order_ids_strictly_increase() {
        let (mut b, responses, _updates) = book();
        for i in 0..5 {
            b.add(1, i, 3, Side::Buy, 90 + i as Price, 10);
        }
        let rs = drain(&responses);
        let mids: Vec<_> = rs
            .iter()
            .filter(|r| r.kind == ResponseKind::Accepted)
            .map(|r| r.market_order_id)
            .collect();
        assert_eq!(mids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn new_then_cancel_restores_prior_state() {
        let (mut b, responses, updates) = book();
        b.add(1, 1, 3, Side::Buy, 100, 10);
        b.add(1, 2, 3, Side::Buy, 101, 20);
        drain(&responses);
        drain(&updates);
        let (depth_before, levels_before, pool_before) =
            (b.depth(Side::Buy, 100), b.bid_levels(), b.orders_in_use());

        b.add(1, 3, 3, Side::Buy, 99, 30);
        b.cancel(1, 3, 3);
        b.validate();

        assert_eq!(b.depth(Side::Buy, 100), depth_before);
        assert_eq!(b.bid_levels(), levels_before);
        assert_eq!(b.orders_in_use(), pool_before);
    }

    #[test]
    fn n_adds_n_cancels_reclaim_everything() {
        let (mut b, responses, updates) = book();
        for i in 0..10u64 {
            let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
            let price = if i % 2 == 0 { 90 - i as Price } else { 110 + i as Price };
            b.add(4, i, 3, side, price, 10 + i as Qty);
        }
        // cancel out of insertion order
        for i in [3u64, 9, 0, 7, 1, 8, 2, 6, 4, 5] {
            b.cancel(4, i, 3);
        }
        b.validate();
        assert_eq!(b.order_count(), 0);
        assert_eq!(b.orders_in_use(), 0);
        assert_eq!(b.bid_levels(), 0);
        assert_eq!(b.ask_levels(), 0);
        drain(&responses);
        drain(&updates);
    }

    #[test]
    fn total_fill_is_min_of_aggressor_and_book() {
        let (mut b, responses, _updates) = book();
        b.add(1, 1, 3, Side::Sell, 100, 30);
        b.add(1, 2, 3, Side::Sell, 101, 30);
        drain(&responses);

        // aggressor wants 100 but only 60 is matchable
        b.add(2, 1, 3, Side::Buy, 101, 100);
        let rs = drain(&responses);
        let agg_fill: Qty = rs
            .iter()
            .filter(|r| r.kind == ResponseKind::Filled && r.client_id == 2)
            .map(|r| r.qty_exec)
            .sum();
        assert_eq!(agg_fill, 60);
        // remainder rests
        assert_eq!(b.depth(Side::Buy, 101), (40, 1));
        b.validate();
    }

    #[test]
    fn process_dispatches_by_kind() {
        let (mut b, responses, _updates) = book();
        let req = ClientRequest {
            kind: RequestKind::New,
            client_id: 1,
            ticker_id: 3,
            order_id: 1,
            side: Side::Buy,
            price: 50,
            qty: 5,
        };
        b.process(&req);
        b.process(&ClientRequest {
            kind: RequestKind::Cancel,
            ..req
        });
        let rs = drain(&responses);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs[1].kind, ResponseKind::Cancelled);
    }
}
