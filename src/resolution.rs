//! Resolution catalogue
//!
//! Deterministic lookup from (root cause, contributing conditions) to an
//! ordered list of remediation actions. The catalogue is fixed at build
//! time; for SYSTEM_OVERLOAD the lead items of the contributing roots are
//! appended after the overload list, deduplicated by (category, action),
//! and the merged list is stable-sorted by priority.

use crate::core::{Condition, Priority, Resolution, RootCause};

/// Generator over the fixed remediation catalogue
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionCatalog;

impl ResolutionCatalog {
    /// Ordered remediation list for a classified detection
    pub fn generate(
        &self,
        root_cause: RootCause,
        contributing: &[Condition],
    ) -> Vec<Resolution> {
        let mut items = catalogue(root_cause);

        if root_cause == RootCause::SystemOverload {
            for condition in contributing {
                let source = catalogue(condition_cause(*condition));
                if let Some(lead) = source.into_iter().next() {
                    items.push(lead);
                }
            }
        }

        dedup_in_place(&mut items);
        items.sort_by_key(|r| r.priority.rank());
        items
    }
}

fn condition_cause(condition: Condition) -> RootCause {
    match condition {
        Condition::LatencyBottleneck => RootCause::LatencyBottleneck,
        Condition::BackendInstability => RootCause::BackendInstability,
        Condition::TrafficSurge => RootCause::TrafficSurge,
        Condition::AbuseOrBot => RootCause::AbuseOrBot,
    }
}

/// Drop later duplicates of (category, action), preserving first
/// occurrence order
fn dedup_in_place(items: &mut Vec<Resolution>) {
    let mut seen: Vec<(String, String)> = Vec::new();
    items.retain(|item| {
        let key = (item.category.clone(), item.action.clone());
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
}

/// The baseline catalogue, ordered by priority within each bucket
fn catalogue(root_cause: RootCause) -> Vec<Resolution> {
    match root_cause {
        RootCause::LatencyBottleneck => vec![
            Resolution::new(
                "Caching",
                "Add read-through cache",
                "Cache frequently accessed data with a TTL to cut database round trips",
                Priority::High,
            ),
            Resolution::new(
                "I/O",
                "Enable async I/O",
                "Use non-blocking operations for external calls and database queries",
                Priority::High,
            ),
            Resolution::new(
                "Database",
                "Tune DB indexes",
                "Add composite indexes on hot columns and review the slow query log",
                Priority::Medium,
            ),
            Resolution::new(
                "Concurrency",
                "Raise worker concurrency",
                "Scale up application workers or enable thread pooling",
                Priority::Medium,
            ),
        ],
        RootCause::BackendInstability => vec![
            Resolution::new(
                "Debugging",
                "Inspect error traces",
                "Review application logs and stack traces to find the failing code path",
                Priority::Critical,
            ),
            Resolution::new(
                "Resilience",
                "Enable circuit breaker",
                "Stop cascade failures by tripping calls to the failing dependency",
                Priority::High,
            ),
            Resolution::new(
                "Deployment",
                "Rollback last deploy",
                "Revert to the last stable version if errors started after a release",
                Priority::High,
            ),
            Resolution::new(
                "Dependencies",
                "Isolate failing dependency",
                "Quarantine the failing external service and add a fallback",
                Priority::Medium,
            ),
        ],
        RootCause::TrafficSurge => vec![
            Resolution::new(
                "Rate Limiting",
                "Apply token-bucket rate limit",
                "Enforce per-client token-bucket limits at the edge",
                Priority::Critical,
            ),
            Resolution::new(
                "Scaling",
                "Autoscale instances",
                "Enable horizontal autoscaling on request throughput",
                Priority::High,
            ),
            Resolution::new(
                "Caching",
                "Cache idempotent responses",
                "Cache GET responses with an appropriate TTL",
                Priority::Medium,
            ),
            Resolution::new(
                "CDN",
                "Enable edge caching",
                "Offload static and cacheable content to the CDN",
                Priority::Medium,
            ),
        ],
        RootCause::AbuseOrBot => vec![
            Resolution::new(
                "Rate Limiting",
                "Apply adaptive rate limits",
                "Tighten per-client limits based on observed behavior",
                Priority::Critical,
            ),
            Resolution::new(
                "Security",
                "Enable IP reputation filter",
                "Block traffic from known-bad sources using reputation feeds",
                Priority::High,
            ),
            Resolution::new(
                "Authentication",
                "Throttle auth and challenge",
                "Add progressive delays and challenges on suspicious logins",
                Priority::High,
            ),
            Resolution::new(
                "WAF",
                "Update WAF rules",
                "Block bot signatures and scraping patterns at the firewall",
                Priority::Medium,
            ),
        ],
        RootCause::SystemOverload => vec![
            Resolution::new(
                "Scaling",
                "Scale horizontally",
                "Add application instances to spread the load",
                Priority::Critical,
            ),
            Resolution::new(
                "Queueing",
                "Queue requests with backpressure",
                "Buffer excess requests instead of exhausting resources",
                Priority::High,
            ),
            Resolution::new(
                "Degradation",
                "Enable graceful degradation",
                "Disable non-critical features and serve cached data",
                Priority::High,
            ),
            Resolution::new(
                "Optimization",
                "Minimise payloads",
                "Reduce response sizes and enable compression",
                Priority::Medium,
            ),
        ],
        RootCause::None => Vec::new(),
    }
}
