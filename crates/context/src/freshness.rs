//! Freshness SLA parsing and evaluation.

use chrono::{DateTime, Utc};
use std::time::Duration;
use strata_core::lineage::{FeatureLineage, FreshnessStatus, FreshnessViolation};

use crate::error::ContextError;
use crate::model::ContextItem;

/// Parse a compact duration: `500ms`, `30s`, `5m`, `2h`, `1d`.
pub fn parse_duration(input: &str) -> Result<Duration, ContextError> {
    let s = input.trim();
    let invalid = || ContextError::InvalidDuration(input.to_string());

    let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (digits, unit) = s.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let millis = match unit {
        "ms" => Some(amount),
        "s" => amount.checked_mul(1_000),
        "m" => amount.checked_mul(60_000),
        "h" => amount.checked_mul(3_600_000),
        "d" => amount.checked_mul(86_400_000),
        _ => None,
    }
    .ok_or_else(invalid)?;

    Ok(Duration::from_millis(millis))
}

/// Outcome of combining item staleness with feature SLA checks.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessReport {
    pub status: FreshnessStatus,
    /// Stale item sources followed by features over the SLA.
    pub stale_sources: Vec<String>,
    pub violations: Vec<FreshnessViolation>,
}

/// Sources of items whose `last_updated` is older than `max_staleness`.
///
/// Items without a source id are reported as `unknown`.
pub fn stale_items(items: &[ContextItem], max_staleness: Duration, now: DateTime<Utc>) -> Vec<String> {
    items
        .iter()
        .filter(|item| {
            item.last_updated.is_some_and(|at| {
                now.signed_duration_since(at)
                    .to_std()
                    .is_ok_and(|age| age > max_staleness)
            })
        })
        .map(|item| item.source_id.clone().unwrap_or_else(|| "unknown".to_string()))
        .collect()
}

/// Combine both freshness signals into one status.
pub fn evaluate(
    stale_item_sources: Vec<String>,
    features: &[FeatureLineage],
    sla: Option<Duration>,
) -> FreshnessReport {
    let mut stale_sources = stale_item_sources;
    let mut violations = Vec::new();

    if let Some(sla) = sla {
        let sla_ms = sla.as_millis() as u64;
        for feature in features.iter().filter(|f| f.freshness_ms > sla_ms) {
            violations.push(FreshnessViolation {
                feature: feature.feature_name.clone(),
                age_ms: feature.freshness_ms,
                sla_ms,
            });
            if !stale_sources.contains(&feature.feature_name) {
                stale_sources.push(feature.feature_name.clone());
            }
        }
    }

    let status = if stale_sources.is_empty() && violations.is_empty() {
        FreshnessStatus::Guaranteed
    } else {
        FreshnessStatus::Degraded
    };

    FreshnessReport {
        status,
        stale_sources,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::lineage::LineageSource;

    fn lineage(name: &str, age_ms: u64) -> FeatureLineage {
        FeatureLineage {
            feature_name: name.into(),
            entity_id: "u1".into(),
            value: json!(1),
            timestamp: Utc::now(),
            freshness_ms: age_ms,
            source: LineageSource::Cache,
        }
    }

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration(" 1d ").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "5", "m", "5 m", "5w", "-5s", "1.5h"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn all_within_sla_is_guaranteed() {
        let features = [lineage("a", 1_000), lineage("b", 299_000)];
        let report = evaluate(Vec::new(), &features, Some(Duration::from_secs(300)));
        assert_eq!(report.status, FreshnessStatus::Guaranteed);
        assert!(report.stale_sources.is_empty());
    }

    #[test]
    fn one_violation_degrades() {
        let features = [lineage("fresh", 1_000), lineage("old", 600_000)];
        let report = evaluate(Vec::new(), &features, Some(Duration::from_secs(300)));
        assert_eq!(report.status, FreshnessStatus::Degraded);
        assert_eq!(report.stale_sources, vec!["old"]);
        assert_eq!(report.violations[0].sla_ms, 300_000);
    }

    #[test]
    fn stale_items_degrade_without_sla() {
        let now = Utc::now();
        let items = [
            ContextItem::new("fresh").source("a").last_updated(now),
            ContextItem::new("old")
                .source("b")
                .last_updated(now - chrono::Duration::hours(2)),
            ContextItem::new("anonymous").last_updated(now - chrono::Duration::hours(2)),
            ContextItem::new("untimed").source("c"),
        ];
        let stale = stale_items(&items, Duration::from_secs(3600), now);
        assert_eq!(stale, vec!["b", "unknown"]);

        let report = evaluate(stale, &[], None);
        assert_eq!(report.status, FreshnessStatus::Degraded);
    }
}
