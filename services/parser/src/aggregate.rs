//! Per-entity expense statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::enrich::EnrichedRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStatistic {
    pub legal_name: String,
    pub region: String,
    pub total: f64,
    pub mean: f64,
    pub stddev: f64,
}

/// Sample (n - 1) standard deviation; 0 for fewer than two values.
pub fn sample_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (squares / (values.len() - 1) as f64).sqrt()
}

/// Group rows with a valid tax id by (legal name, region), sorted by total
/// descending. Ties keep (legal name, region) order.
pub fn aggregate(records: &[EnrichedRecord<'_>]) -> Vec<AggregatedStatistic> {
    let mut groups: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.tax_id_valid) {
        groups
            .entry((record.entry.legal_name.as_str(), record.entry.region.as_str()))
            .or_default()
            .push(record.expense.expense_value);
    }

    let mut stats: Vec<AggregatedStatistic> = groups
        .into_iter()
        .map(|((legal_name, region), values)| {
            let total: f64 = values.iter().sum();
            let mean = total / values.len() as f64;
            AggregatedStatistic {
                legal_name: legal_name.to_string(),
                region: region.to_string(),
                total,
                mean,
                stddev: sample_stddev(&values, mean),
            }
        })
        .collect();

    stats.sort_by(|a, b| b.total.total_cmp(&a.total));
    stats
}
