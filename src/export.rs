//! Export Module
//!
//! Renders an [`AnalysisResult`] as a console summary, a fixed-layout text
//! report, pretty JSON, or JSON Lines for downstream tooling.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::analysis::AnalysisResult;
use crate::detector::{HistogramBin, TrafficStatistics};
use crate::ranker::RankedEntity;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonLines, // One JSON object per line (JSONL)
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
        }
    }
}

/// JSON-serializable analysis result
#[derive(Serialize)]
pub struct JsonReport {
    pub version: &'static str,
    pub lines_read: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub rejected_by_reason: BTreeMap<&'static str, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<JsonSpan>,
    pub bucket_secs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<TrafficStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<JsonAnomaly>,
    pub series: Vec<JsonBucket>,
    pub flagged: Vec<JsonBucket>,
    pub distinct_sources: usize,
    pub top_sources: Vec<RankedEntity>,
    pub chart_top_sources: Vec<RankedEntity>,
    pub status_codes: BTreeMap<u16, u64>,
    pub intensity_histogram: Vec<HistogramBin>,
}

impl From<&AnalysisResult> for JsonReport {
    fn from(result: &AnalysisResult) -> Self {
        let bucket = |b: &crate::aggregator::Bucket| JsonBucket {
            start: result.localize(b.start).to_rfc3339(),
            count: b.count,
        };

        Self {
            version: "1.0",
            lines_read: result.lines_read,
            accepted: result.accepted,
            rejected: result.rejected,
            rejected_by_reason: result
                .rejected_by_reason
                .iter()
                .map(|(reason, count)| (reason.label(), *count))
                .collect(),
            time_range: result.time_range.map(|range| JsonSpan {
                start: range.start.to_rfc3339(),
                end: range.end.to_rfc3339(),
                duration_secs: range.duration().num_seconds(),
            }),
            bucket_secs: result.series.bucket_secs(),
            statistics: result.statistics.clone(),
            threshold: result.threshold,
            anomaly: result.anomaly.map(|window| JsonAnomaly {
                start: result.localize(window.start).to_rfc3339(),
                end: result.localize(window.end).to_rfc3339(),
                duration_secs: window.duration().num_seconds(),
                peak_count: window.peak_count,
                anomalous_buckets: window.anomalous_bucket_count,
            }),
            series: result.series.buckets().iter().map(bucket).collect(),
            flagged: result.flagged.iter().map(bucket).collect(),
            distinct_sources: result.distinct_sources,
            top_sources: result.top_sources.clone(),
            chart_top_sources: result.wide_top_sources.clone(),
            status_codes: result.status_codes.clone(),
            intensity_histogram: result.intensity_histogram.clone(),
        }
    }
}

/// Start and end of an observed span
#[derive(Serialize)]
pub struct JsonSpan {
    pub start: String,
    pub end: String,
    pub duration_secs: i64,
}

/// JSON-serializable anomaly window
#[derive(Serialize)]
pub struct JsonAnomaly {
    pub start: String,
    pub end: String,
    pub duration_secs: i64,
    pub peak_count: u64,
    pub anomalous_buckets: usize,
}

#[derive(Serialize)]
pub struct JsonBucket {
    pub start: String,
    pub count: u64,
}

/// Exports a result in the specified format
pub fn export_result(result: &AnalysisResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => export_text(result),
        OutputFormat::Json => export_json(result),
        OutputFormat::JsonLines => export_jsonl(result),
    }
}

/// Exports result as pretty-printed JSON
pub fn export_json(result: &AnalysisResult) -> String {
    let json_report = JsonReport::from(result);
    serde_json::to_string_pretty(&json_report)
        .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Exports result as JSON Lines (summary, then one ranked source per line)
pub fn export_jsonl(result: &AnalysisResult) -> String {
    let mut lines = Vec::new();

    // First line is the summary
    let summary = serde_json::json!({
        "type": "summary",
        "accepted": result.accepted,
        "rejected": result.rejected,
        "buckets": result.series.len(),
        "threshold": result.threshold,
        "anomaly": result.anomaly.map(|w| serde_json::json!({
            "start": result.localize(w.start).to_rfc3339(),
            "end": result.localize(w.end).to_rfc3339(),
            "peak_count": w.peak_count,
            "anomalous_buckets": w.anomalous_bucket_count,
        })),
    });
    lines.push(serde_json::to_string(&summary).unwrap_or_default());

    for (rank, source) in result.top_sources.iter().enumerate() {
        let line = serde_json::json!({
            "type": "source",
            "rank": rank + 1,
            "key": source.key,
            "count": source.count,
            "share_percent": source.share_percent,
        });
        if let Ok(line) = serde_json::to_string(&line) {
            lines.push(line);
        }
    }

    lines.join("\n")
}

/// Exports result as a console summary
pub fn export_text(result: &AnalysisResult) -> String {
    let mut output = String::new();
    let unit = rate_unit(result.series.bucket_secs());

    output.push_str(&format!(
        "Total records parsed: {}\nRejected lines: {}\n",
        result.accepted, result.rejected
    ));

    if let Some(range) = &result.time_range {
        output.push_str(&format!(
            "Time range: {} to {}\nDuration: {}\n",
            range.start.format(TIME_FORMAT),
            range.end.format(TIME_FORMAT),
            format_duration(range.duration())
        ));
    }

    if let (Some(stats), Some(threshold)) = (&result.statistics, result.threshold) {
        output.push_str(&format!(
            "\nTraffic Statistics (requests {}):\n\
             Total buckets with traffic: {}\n\
             Mean: {:.2}\nStd Dev: {:.2}\nMax: {}\nMin: {}\nThreshold: {:.2}\n",
            unit, stats.buckets, stats.mean, stats.std_dev, stats.max, stats.min, threshold
        ));
    } else {
        output.push_str("\nNo traffic observed\n");
    }

    match &result.anomaly {
        Some(window) => {
            output.push_str(&format!(
                "\nAnomaly Detected!\nStart: {}\nEnd: {}\nDuration: {}\n\
                 Peak traffic: {} requests {}\nNumber of anomalous buckets: {}\n",
                format_time(result, window.start),
                format_time(result, window.end),
                format_duration(window.duration()),
                window.peak_count,
                unit,
                window.anomalous_bucket_count
            ));
        }
        None => output.push_str("\nNo anomaly detected\n"),
    }

    output.push_str(&format!(
        "\nTop {} Most Active Sources:\n",
        result.top_sources.len()
    ));
    for source in &result.top_sources {
        output.push_str(&format!(
            "{}: {} requests ({:.1}%)\n",
            source.key, source.count, source.share_percent
        ));
    }

    output.push_str("\nHTTP Status Code Distribution:\n");
    for (code, count) in &result.status_codes {
        output.push_str(&format!("{}: {}\n", code, count));
    }

    output
}

/// Renders the fixed-layout incident report written to disk.
pub fn render_report(result: &AnalysisResult, log_file: &str, generated_at: NaiveDateTime) -> String {
    let mut report = String::new();
    let unit = rate_unit(result.series.bucket_secs());

    report.push_str("DDoS ATTACK DETECTION REPORT\n");
    report.push_str(&"=".repeat(50));
    report.push_str("\n\n");
    report.push_str(&format!(
        "Analysis Date: {}\n",
        generated_at.format(TIME_FORMAT)
    ));
    report.push_str(&format!("Log File: {}\n\n", log_file));

    report.push_str("Attack Period:\n");
    match &result.anomaly {
        Some(window) => {
            report.push_str(&format!(
                "  Start: {}\n  End: {}\n  Duration: {}\n\n",
                format_time(result, window.start),
                format_time(result, window.end),
                format_duration(window.duration())
            ));
        }
        None => report.push_str("  No anomaly detected\n\n"),
    }

    report.push_str("Attack Statistics:\n");
    if let Some(window) = &result.anomaly {
        report.push_str(&format!(
            "  Peak Traffic: {} requests {}\n  Total Anomalous Buckets: {}\n",
            window.peak_count, unit, window.anomalous_bucket_count
        ));
    }
    match result.threshold {
        Some(threshold) => report.push_str(&format!("  Threshold Used: {:.2}\n\n", threshold)),
        None => report.push_str("  Threshold Used: N/A\n\n"),
    }

    report.push_str("Top Attacking IPs:\n");
    for source in &result.top_sources {
        report.push_str(&format!("  {}: {} requests\n", source.key, source.count));
    }

    report
}

fn format_time(result: &AnalysisResult, ts: DateTime<Utc>) -> String {
    result.localize(ts).format(TIME_FORMAT).to_string()
}

/// Formats a span as `<days> days HH:MM:SS`.
fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds();
    let days = total.div_euclid(86_400);
    let rem = total.rem_euclid(86_400);
    format!(
        "{} days {:02}:{:02}:{:02}",
        days,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

fn rate_unit(bucket_secs: u32) -> String {
    if bucket_secs == 1 {
        "per second".to_string()
    } else {
        format!("per {}s", bucket_secs)
    }
}
