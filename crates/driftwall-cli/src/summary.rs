//! Turn per-run summary documents into wall points.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;

use driftwall_core::WallPoint;

use crate::io::read_json;

pub const SUMMARY_FILE: &str = "summary.json";

/// Resolve a dotted path (`drift.step_rate`, `runs.0.metric`) inside a JSON
/// document. Array segments are numeric indexes.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|seg| !seg.is_empty())
        .try_fold(value, |cur, seg| match cur {
            Value::Object(map) => map.get(seg),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Finite number from a JSON number or a numeric string.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn tag(summary: &Value, field: &str) -> Option<String> {
    summary.get(field).and_then(Value::as_str).map(str::to_string)
}

pub fn point_from_summary(
    summary: &Value,
    run_dir: &str,
    param_key: &str,
    metric_path: &str,
) -> Option<WallPoint> {
    let param = lookup_path(summary, param_key).and_then(as_number)?;
    let metric = lookup_path(summary, metric_path).and_then(as_number)?;
    Some(WallPoint {
        run_dir: run_dir.to_string(),
        param,
        metric,
        state_mode: tag(summary, "state_mode"),
        distractor_profile: tag(summary, "distractor_profile"),
    })
}

fn summary_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(SUMMARY_FILE)
    } else {
        path.to_path_buf()
    }
}

/// Load one point per summary. Directories are read as `<dir>/summary.json`;
/// the directory holding the summary becomes the point's `run_dir`.
/// Summaries that lack the param or metric are skipped with a warning.
pub fn load_points(
    paths: &[PathBuf],
    param_key: &str,
    metric_path: &str,
) -> Result<Vec<WallPoint>> {
    let mut points = Vec::with_capacity(paths.len());
    for path in paths {
        let file = summary_file(path);
        let run_dir = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| ".".to_string(), |p| p.display().to_string());

        let summary: Value = read_json(&file)?;
        match point_from_summary(&summary, &run_dir, param_key, metric_path) {
            Some(point) => points.push(point),
            None => tracing::warn!(
                "skipping {}: no numeric {param_key} / {metric_path}",
                file.display()
            ),
        }
    }
    Ok(points)
}
