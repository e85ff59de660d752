use std::cmp::Ordering;

use crate::probe::Measurement;

/// Loss ascending, then latency ascending, then throughput descending
pub fn compare(a: &Measurement, b: &Measurement) -> Ordering {
    a.loss
        .total_cmp(&b.loss)
        .then(a.latency_ms.cmp(&b.latency_ms))
        .then(b.download_mbps.total_cmp(&a.download_mbps))
}

/// Sort by [`compare`] and keep the best `limit` entries
pub fn rank(mut measurements: Vec<Measurement>, limit: usize) -> Vec<Measurement> {
    measurements.sort_by(compare);
    measurements.truncate(limit);
    measurements
}
