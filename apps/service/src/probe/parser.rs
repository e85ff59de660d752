//! Reader for the CSV file CloudflareSpeedTest writes with `-o`.
//!
//! Layout: `IP, sent, received, loss, latency, download MB/s[, region]` after a
//! single header row. The tool never quotes fields, so rows are split on commas.

use std::path::Path;

use tracing::debug;

use super::error::ProbeError;
use super::types::Measurement;

const MIN_FIELDS: usize = 6;
const COL_ADDRESS: usize = 0;
const COL_LOSS: usize = 3;
const COL_LATENCY: usize = 4;
const COL_SPEED: usize = 5;
const COL_REGION: usize = 6;

/// Read and parse a result file
pub async fn read_results(path: &Path) -> Result<Vec<Measurement>, ProbeError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProbeError::ResultFile { path: path.to_path_buf(), source })?;

    let measurements = parse_results(&raw, path)?;
    if measurements.is_empty() {
        return Err(ProbeError::NoRows(path.to_path_buf()));
    }
    Ok(measurements)
}

/// Parse result file contents. `path` is only used in error messages.
pub fn parse_results(raw: &str, path: &Path) -> Result<Vec<Measurement>, ProbeError> {
    let mut lines = raw.lines().enumerate();

    let has_header = lines
        .by_ref()
        .find(|(_, line)| !line.trim().is_empty())
        .is_some();
    if !has_header {
        return Err(ProbeError::EmptyResultFile(path.to_path_buf()));
    }

    let mut measurements = Vec::new();
    for (index, line) in lines {
        let line_no = index + 1;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if line.trim().is_empty() || fields.len() < MIN_FIELDS {
            debug!("Skipping short row {} in {}", line_no, path.display());
            continue;
        }
        measurements.push(parse_row(&fields, line_no)?);
    }

    Ok(measurements)
}

fn parse_row(fields: &[&str], line: usize) -> Result<Measurement, ProbeError> {
    let address = fields[COL_ADDRESS];
    if address.is_empty() {
        return Err(ProbeError::MalformedRow { line, reason: "empty address".into() });
    }

    let loss = parse_loss(fields[COL_LOSS], line)?;
    let latency = parse_non_negative(fields[COL_LATENCY], "latency", line)?;
    let speed_mbytes = parse_non_negative(fields[COL_SPEED], "download speed", line)?;

    let mut measurement = Measurement::new(address, loss, latency as u64, speed_mbytes * 8.0);
    if let Some(region) = fields.get(COL_REGION).filter(|r| !r.is_empty()) {
        measurement = measurement.with_region(*region);
    }
    Ok(measurement)
}

/// Loss is a fraction, so anything above 1.0 is malformed
fn parse_loss(raw: &str, line: usize) -> Result<f64, ProbeError> {
    let loss = parse_non_negative(raw, "loss", line)?;
    if loss > 1.0 {
        return Err(ProbeError::MalformedRow { line, reason: format!("loss '{raw}' exceeds 1.0") });
    }
    Ok(loss)
}

fn parse_non_negative(raw: &str, field: &str, line: usize) -> Result<f64, ProbeError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(ProbeError::MalformedRow { line, reason: format!("invalid {field} '{raw}'") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const HEADER: &str = "IP 地址,已发送,已接收,丢包率,平均延迟,下载速度 (MB/s),地区码";

    fn path() -> PathBuf {
        PathBuf::from("result.csv")
    }

    #[test]
    fn parses_rows_and_converts_speed_to_megabits() {
        let raw = format!("{HEADER}\n104.16.1.1,4,4,0.00,120.47,2.50,LAX\n104.16.1.2,4,3,0.25,98.2,1.00\n");
        let results = parse_results(&raw, &path()).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].address, "104.16.1.1");
        assert_eq!(results[0].latency_ms, 120);
        assert_eq!(results[0].download_mbps, 20.0);
        assert_eq!(results[0].region.as_deref(), Some("LAX"));
        assert_eq!(results[1].loss, 0.25);
        assert_eq!(results[1].region, None);
    }

    #[test]
    fn empty_file_is_an_error() {
        assert!(matches!(parse_results("", &path()), Err(ProbeError::EmptyResultFile(_))));
        assert!(matches!(parse_results("\n  \n", &path()), Err(ProbeError::EmptyResultFile(_))));
    }

    #[test]
    fn header_only_yields_no_rows() {
        let results = parse_results(&format!("{HEADER}\n"), &path()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn short_and_blank_rows_are_skipped() {
        let raw = format!("{HEADER}\n1.1.1.1,4,4\n\n1.0.0.1,4,4,0.00,10,1.5\n");
        let results = parse_results(&raw, &path()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].address, "1.0.0.1");
    }

    #[test]
    fn malformed_numbers_fail_the_file() {
        let raw = format!("{HEADER}\n1.1.1.1,4,4,abc,10,1.5\n");
        match parse_results(&raw, &path()) {
            Err(ProbeError::MalformedRow { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected: {other:?}"),
        }

        let negative = format!("{HEADER}\n1.1.1.1,4,4,0.1,-3,1.5\n");
        assert!(matches!(parse_results(&negative, &path()), Err(ProbeError::MalformedRow { .. })));
    }

    #[test]
    fn loss_above_one_is_malformed() {
        let full_loss = format!("{HEADER}\n1.1.1.1,4,0,1.00,0,0.00\n");
        assert_eq!(parse_results(&full_loss, &path()).unwrap()[0].loss, 1.0);

        let raw = format!("{HEADER}\n1.1.1.1,4,4,0.00,10,1.5\n1.0.0.1,4,4,1.7,10,1.5\n");
        match parse_results(&raw, &path()) {
            Err(ProbeError::MalformedRow { line, reason }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("1.7"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_and_header_only_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.csv");
        assert!(matches!(read_results(&missing).await, Err(ProbeError::ResultFile { .. })));

        let header_only = dir.path().join("header.csv");
        std::fs::write(&header_only, format!("{HEADER}\n")).unwrap();
        assert!(matches!(read_results(&header_only).await, Err(ProbeError::NoRows(_))));
    }
}
