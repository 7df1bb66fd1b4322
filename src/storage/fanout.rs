//! Parallel per-fragment calls with fan-in of results and failures.
//!
//! Every fragment call runs to completion even when a sibling fails. Failures
//! are collected and reported together once all calls are done; partial results
//! are discarded in that case.

use super::dispatch::{DispatchResult, FragmentRoute};
use crate::catalog::Fragment;
use crate::error::{DataPlaneError, Result};

use std::future::Future;
use tokio::task::JoinSet;

/// Runs `call` once per reachable fragment and returns the results in fragment order.
///
/// Unreachable fragments count as failures without issuing a call.
pub async fn fan_out<R, F, Fut>(context: &str, routes: Vec<FragmentRoute>, call: F) -> Result<Vec<R>>
where
    R: Send + 'static,
    F: Fn(Fragment, DispatchResult) -> Fut,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let total = routes.len();
    let mut failures: Vec<(u32, String)> = Vec::new();
    let mut results: Vec<(u32, R)> = Vec::with_capacity(total);
    let mut calls = JoinSet::new();

    for route in routes {
        let order = route.fragment.fragment_order;
        match route.target {
            Ok(target) => {
                let pending = call(route.fragment, target);
                calls.spawn(async move { (order, pending.await) });
            }
            Err(e) => failures.push((order, format!("fragment {}: {}", order, e))),
        }
    }

    while let Some(joined) = calls.join_next().await {
        match joined {
            Ok((order, Ok(value))) => results.push((order, value)),
            Ok((order, Err(e))) => {
                tracing::warn!("{}: fragment {} failed: {:#}", context, order, e);
                failures.push((order, format!("fragment {}: {:#}", order, e)));
            }
            // A panicked call has no fragment order to report; it sorts last.
            Err(e) => failures.push((u32::MAX, format!("fragment task aborted: {}", e))),
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|(order, _)| *order);
        return Err(DataPlaneError::AggregateFailure {
            context: context.to_string(),
            causes: failures.into_iter().map(|(_, cause)| cause).collect(),
        });
    }

    tracing::debug!("{}: {} fragment call(s) succeeded", context, total);
    results.sort_by_key(|(order, _)| *order);
    Ok(results.into_iter().map(|(_, value)| value).collect())
}

/// Fan-out whose per-fragment results are summed.
pub async fn fan_out_sum<F, Fut>(context: &str, routes: Vec<FragmentRoute>, call: F) -> Result<u64>
where
    F: Fn(Fragment, DispatchResult) -> Fut,
    Fut: Future<Output = anyhow::Result<u64>> + Send + 'static,
{
    Ok(fan_out(context, routes, call).await?.into_iter().sum())
}
