//! Fail-soft boundary for cache calls
//!
//! A cache fault is the failure of an optimization, never of the operation.
//! Components route every backend call through [`soften`], which logs the
//! fault, counts it, and hands back `None` so the caller can take its
//! miss / no-op branch.

use crate::{CacheMetrics, CacheResult};
use std::future::Future;
use tracing::warn;

pub async fn soften<T, F>(op: &'static str, key: &str, call: F) -> Option<T>
where
    F: Future<Output = CacheResult<T>>,
{
    match call.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(op = op, key = %key, error = %e, "Cache call failed, degrading");
            CacheMetrics::new().record_error(key, op);
            None
        }
    }
}
