//! Capacity wall search over a parameter sweep.
//!
//! Points from repeated runs are collapsed per parameter value, ordered by
//! parameter and scanned once for the first threshold crossing. The scan makes
//! no monotonicity assumption.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DriftwallError, DriftwallResult};

// ---------------------------------------------------------------------------
// Points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallPoint {
    pub run_dir: String,
    pub param: f64,
    pub metric: f64,
    #[serde(default)]
    pub state_mode: Option<String>,
    #[serde(default)]
    pub distractor_profile: Option<String>,
}

impl WallPoint {
    pub fn new(run_dir: impl Into<String>, param: f64, metric: f64) -> Self {
        Self {
            run_dir: run_dir.into(),
            param,
            metric,
            state_mode: None,
            distractor_profile: None,
        }
    }

    pub fn summary(&self) -> PointSummary {
        PointSummary {
            param: self.param,
            metric: self.metric,
            run_dir: self.run_dir.clone(),
        }
    }
}

/// The `{param, metric, run_dir}` shape used for `last_ok` and `wall`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSummary {
    pub param: f64,
    pub metric: f64,
    pub run_dir: String,
}

/// Exact-match filter on the optional point tags. A dimension is only
/// filtered when both the filter and the point carry a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointFilter {
    pub state_mode: Option<String>,
    pub distractor_profile: Option<String>,
}

impl PointFilter {
    pub fn matches(&self, point: &WallPoint) -> bool {
        tag_matches(self.state_mode.as_deref(), point.state_mode.as_deref())
            && tag_matches(
                self.distractor_profile.as_deref(),
                point.distractor_profile.as_deref(),
            )
    }

    pub fn apply(&self, points: Vec<WallPoint>) -> Vec<WallPoint> {
        points.into_iter().filter(|p| self.matches(p)).collect()
    }
}

fn tag_matches(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match (wanted, actual) {
        (Some(w), Some(a)) => w == a,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Direction / Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Wall at the first `metric >= threshold`.
    #[default]
    Gte,
    /// Wall at the first `metric <= threshold`.
    Lte,
}

impl Direction {
    pub fn acceptable(self, metric: f64, threshold: f64) -> bool {
        match self {
            Self::Gte => metric < threshold,
            Self::Lte => metric > threshold,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gte => write!(f, "gte"),
            Self::Lte => write!(f, "lte"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gte" | ">=" => Ok(Self::Gte),
            "lte" | "<=" => Ok(Self::Lte),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Max,
    Min,
    None,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => write!(f, "max"),
            Self::Min => write!(f, "min"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "none" => Ok(Self::None),
            _ => Err(format!("invalid aggregation mode: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregation + scan
// ---------------------------------------------------------------------------

/// Stable sort by `param`, then collapse equal params according to `mode`.
/// Within a group the first-seen point wins ties.
pub fn aggregate(mut points: Vec<WallPoint>, mode: Aggregation) -> Vec<WallPoint> {
    points.sort_by(|a, b| a.param.total_cmp(&b.param));
    if mode == Aggregation::None {
        return points;
    }

    let mut out: Vec<WallPoint> = Vec::with_capacity(points.len());
    for point in points {
        match out.last_mut() {
            Some(kept) if kept.param == point.param => {
                let better = match mode {
                    Aggregation::Max => point.metric > kept.metric,
                    Aggregation::Min => point.metric < kept.metric,
                    Aggregation::None => false,
                };
                if better {
                    *kept = point;
                }
            }
            _ => out.push(point),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct WallScan {
    /// Points in scan order (aggregated and sorted).
    pub points: Vec<WallPoint>,
    pub last_ok: Option<WallPoint>,
    pub wall: Option<WallPoint>,
}

/// Aggregate, sort and scan for the first point that fails acceptability.
pub fn find_wall(
    points: Vec<WallPoint>,
    threshold: f64,
    direction: Direction,
    mode: Aggregation,
) -> DriftwallResult<WallScan> {
    if !threshold.is_finite() {
        return Err(DriftwallError::Precondition(format!(
            "threshold must be finite, got {threshold}"
        )));
    }
    if let Some(bad) = points
        .iter()
        .find(|p| !p.param.is_finite() || !p.metric.is_finite())
    {
        return Err(DriftwallError::Precondition(format!(
            "non-finite point in {}: param={}, metric={}",
            bad.run_dir, bad.param, bad.metric
        )));
    }

    let points = aggregate(points, mode);
    let mut last_ok = None;
    let mut wall = None;
    for point in &points {
        if direction.acceptable(point.metric, threshold) {
            last_ok = Some(point);
        } else {
            wall = Some(point);
            break;
        }
    }

    Ok(WallScan {
        last_ok: last_ok.cloned(),
        wall: wall.cloned(),
        points,
    })
}

// ---------------------------------------------------------------------------
// Query / report
// ---------------------------------------------------------------------------

/// Everything needed to turn a point set into a [`WallReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct WallQuery {
    pub metric_path: String,
    pub param_key: String,
    pub threshold: f64,
    pub direction: Direction,
    pub aggregation: Aggregation,
    pub filter: PointFilter,
}

impl WallQuery {
    pub fn new(
        metric_path: impl Into<String>,
        param_key: impl Into<String>,
        threshold: f64,
    ) -> Self {
        Self {
            metric_path: metric_path.into(),
            param_key: param_key.into(),
            threshold,
            direction: Direction::default(),
            aggregation: Aggregation::default(),
            filter: PointFilter::default(),
        }
    }

    pub fn run(&self, points: Vec<WallPoint>) -> DriftwallResult<WallReport> {
        let candidates = self.filter.apply(points);
        let scan = find_wall(candidates, self.threshold, self.direction, self.aggregation)?;
        tracing::debug!(
            points = scan.points.len(),
            wall = ?scan.wall.as_ref().map(|p| p.param),
            "wall scan complete"
        );
        Ok(WallReport {
            metric_path: self.metric_path.clone(),
            param_key: self.param_key.clone(),
            threshold: self.threshold,
            direction: self.direction,
            state_mode: self.filter.state_mode.clone(),
            distractor_profile: self.filter.distractor_profile.clone(),
            last_ok: scan.last_ok.as_ref().map(WallPoint::summary),
            wall: scan.wall.as_ref().map(WallPoint::summary),
            points: scan.points,
        })
    }
}

/// Persisted wall report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallReport {
    pub metric_path: String,
    pub param_key: String,
    pub threshold: f64,
    pub direction: Direction,
    pub state_mode: Option<String>,
    pub distractor_profile: Option<String>,
    pub points: Vec<WallPoint>,
    pub last_ok: Option<PointSummary>,
    pub wall: Option<PointSummary>,
}

impl fmt::Display for WallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_point = |p: &Option<PointSummary>| match p {
            Some(p) => format!(
                "{}={} ({}={:.4})",
                self.param_key, p.param, self.metric_path, p.metric
            ),
            None => "none".to_string(),
        };
        write!(
            f,
            "{} {} {}: last_ok {}, wall {}",
            self.metric_path,
            self.direction,
            self.threshold,
            fmt_point(&self.last_ok),
            fmt_point(&self.wall)
        )
    }
}
