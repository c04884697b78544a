// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Period aggregation and reconciliation engine.
//!
//! Components are request/response style: compute, then write. Aggregate
//! updates are commutative SQL increments so that at-least-once, unordered
//! event delivery converges on the correct sums. Every mutating entry
//! point returns a structured outcome with an `errors` list; partial
//! success is a normal result, not an exception.

pub mod batch;
pub mod cache;
pub mod events;
pub mod outflow;
pub mod periods;
pub mod reconcile;
pub mod resolver;
pub mod summary;

use std::thread;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, rejected before any write.
    #[error("validation: {0}")]
    Validation(String),

    /// Referenced budget/outflow/transaction/period missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Store-level failure (may be transient).
    #[error("store: {0}")]
    Store(#[from] rusqlite::Error),

    /// Detected drift between an aggregate and its base documents.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Busy/locked store errors are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 25;

/// Run `f`, retrying transient store failures with exponential backoff.
/// Gives up after a bounded number of attempts; never hangs.
pub fn with_retries<T>(what: &str, mut f: impl FnMut() -> EngineResult<T>) -> EngineResult<T> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                let delay = BACKOFF_BASE_MS << attempt;
                tracing::warn!(%what, attempt, delay_ms = delay, "transient store error, retrying: {e}");
                thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Convert a currency amount to integer minor units. Aggregate counters
/// store cents so increments stay commutative; amounts finer than two
/// decimal places are rejected up front as malformed input.
pub fn to_cents(amount: Decimal) -> EngineResult<i64> {
    let scaled = amount * Decimal::from(100);
    if scaled != scaled.trunc() {
        return Err(EngineError::Validation(format!(
            "amount '{amount}' has sub-cent precision"
        )));
    }
    scaled
        .trunc()
        .to_i64()
        .ok_or_else(|| EngineError::Validation(format!("amount '{amount}' out of range")))
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
