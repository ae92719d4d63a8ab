//! Order Matching Engine Module
//!
//! Price-time-priority matching over per-pair dark books.
//!
//! # Architecture
//!
//! ```text
//! API Handler
//!   ↓ submit / cancel (admission checks the on-chain commitment)
//! MatchingEngine
//!   ├→ order channel ──┐
//!   ├→ cancel channel ─┼→ worker pool
//!   │                  │     ├→ OrderBookSet (per pair, dual heap)
//!   │                  │     └→ Durable Store (atomic fill transactions)
//!   └→ match channel ←─┘  (bounded, backpressured)
//! ```
//!
//! # Features
//!
//! - **Commit-Reveal Admission**: orders enter only when the revealed detail
//!   hashes to the on-chain commitment
//! - **Price-Time Priority**: best price first, oldest first on ties
//! - **Variance Windows**: symmetric price bounds in basis points; crosses
//!   execute at the clamped midpoint
//! - **Transactional Fills**: the match row and both fill updates commit in
//!   one transaction; in-memory books mirror only committed state

mod engine;
mod orderbook;
mod types;

pub use engine::{EngineConfig, MatchingEngine};
pub use orderbook::{OrderBook, OrderBookSet};
pub use types::*;
