//! Space definitions and the transform between the user-facing domain and the
//! normalized unit hypercube.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::SpaceError;

/// A single dimension of a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Human-readable dimension name (e.g. "block_size").
    pub name: String,
    /// The kind of domain.
    pub kind: DimensionKind,
}

/// Describes the user-facing domain of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DimensionKind {
    /// Continuous range [low, high].
    Real { low: f64, high: f64 },
    /// Continuous range normalized in log-space.
    LogReal { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    Integer { low: i64, high: i64 },
    /// Categorical choices.
    Categorical { categories: Vec<String> },
}

impl DimensionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Real { .. } => "real",
            Self::LogReal { .. } => "log-real",
            Self::Integer { .. } => "integer",
            Self::Categorical { .. } => "categorical",
        }
    }
}

/// A concrete value in the user-facing domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Categorical(String),
}

impl Value {
    /// Numeric view of the value; categorical values have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Categorical(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Categorical(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Categorical(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Categorical(v.to_string())
    }
}

/// A point in the user-facing domain, one value per dimension in declared order.
pub type Point = Vec<Value>;

/// Named view of one or more points, handed to constraints and objectives.
pub type Assignment = HashMap<String, Value>;

/// An ordered list of dimensions.
///
/// Every dimension normalizes to exactly one coordinate in `[0, 1]`, so the
/// normalized dimensionality equals [`Space::len`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Space {
    dimensions: Vec<Dimension>,
}

impl Space {
    pub fn new() -> Self {
        Self {
            dimensions: Vec::new(),
        }
    }

    pub fn add_real(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Real { low, high },
        });
        self
    }

    pub fn add_log_real(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::LogReal { low, high },
        });
        self
    }

    pub fn add_integer(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Integer { low, high },
        });
        self
    }

    pub fn add_categorical<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        categories: impl IntoIterator<Item = S>,
    ) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Categorical {
                categories: categories.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Dimensions in declared order.
    pub fn iter(&self) -> std::slice::Iter<'_, Dimension> {
        self.dimensions.iter()
    }

    pub fn dimension(&self, index: usize) -> Option<&Dimension> {
        self.dimensions.get(index)
    }

    /// Check that every dimension has a usable domain.
    pub fn validate(&self) -> Result<(), SpaceError> {
        for dim in &self.dimensions {
            let invalid = |message: &str| SpaceError::InvalidBounds {
                dimension: dim.name.clone(),
                message: message.to_string(),
            };
            match &dim.kind {
                DimensionKind::Real { low, high } => {
                    if !(low.is_finite() && high.is_finite() && low < high) {
                        return Err(invalid("expected finite low < high"));
                    }
                }
                DimensionKind::LogReal { low, high } => {
                    if !(low.is_finite() && high.is_finite() && *low > 0.0 && low < high) {
                        return Err(invalid("expected finite 0 < low < high"));
                    }
                }
                DimensionKind::Integer { low, high } => {
                    if low > high {
                        return Err(invalid("expected low <= high"));
                    }
                }
                DimensionKind::Categorical { categories } => {
                    if categories.is_empty() {
                        return Err(invalid("expected at least one category"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Map one user-facing point into the normalized domain.
    pub fn transform_point(&self, point: &[Value]) -> Result<Vec<f64>, SpaceError> {
        self.check_arity(point.len())?;
        self.dimensions
            .iter()
            .zip(point)
            .map(|(dim, value)| normalize(dim, value))
            .collect()
    }

    /// Map one normalized point back into the user-facing domain.
    pub fn inverse_transform_point(&self, point: &[f64]) -> Result<Point, SpaceError> {
        self.check_arity(point.len())?;
        self.dimensions
            .iter()
            .zip(point)
            .map(|(dim, x)| denormalize(dim, *x))
            .collect()
    }

    pub fn transform(&self, points: &[Point]) -> Result<Vec<Vec<f64>>, SpaceError> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    pub fn inverse_transform(&self, points: &[Vec<f64>]) -> Result<Vec<Point>, SpaceError> {
        points.iter().map(|p| self.inverse_transform_point(p)).collect()
    }

    /// Name every coordinate of a user-facing point.
    pub fn bind(&self, point: &[Value]) -> Result<Assignment, SpaceError> {
        self.check_arity(point.len())?;
        Ok(self
            .dimensions
            .iter()
            .zip(point)
            .map(|(dim, value)| (dim.name.clone(), value.clone()))
            .collect())
    }

    fn check_arity(&self, found: usize) -> Result<(), SpaceError> {
        if found != self.dimensions.len() {
            return Err(SpaceError::DimensionMismatch {
                expected: self.dimensions.len(),
                found,
            });
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Space {
    type Item = &'a Dimension;
    type IntoIter = std::slice::Iter<'a, Dimension>;

    fn into_iter(self) -> Self::IntoIter {
        self.dimensions.iter()
    }
}

fn normalize(dim: &Dimension, value: &Value) -> Result<f64, SpaceError> {
    let out_of_domain = || SpaceError::OutOfDomain {
        dimension: dim.name.clone(),
        value: value.to_string(),
    };
    let kind_mismatch = || SpaceError::KindMismatch {
        dimension: dim.name.clone(),
        expected: dim.kind.label(),
        found: value.to_string(),
    };

    match &dim.kind {
        DimensionKind::Real { low, high } => {
            let v = value.as_f64().ok_or_else(kind_mismatch)?;
            if !(v >= *low && v <= *high) {
                return Err(out_of_domain());
            }
            Ok((v - low) / (high - low))
        }
        DimensionKind::LogReal { low, high } => {
            let v = value.as_f64().ok_or_else(kind_mismatch)?;
            if !(v >= *low && v <= *high) {
                return Err(out_of_domain());
            }
            Ok((v.ln() - low.ln()) / (high.ln() - low.ln()))
        }
        DimensionKind::Integer { low, high } => {
            let v = value.as_i64().ok_or_else(kind_mismatch)?;
            if v < *low || v > *high {
                return Err(out_of_domain());
            }
            let buckets = (high - low + 1) as f64;
            Ok(((v - low) as f64 + 0.5) / buckets)
        }
        DimensionKind::Categorical { categories } => {
            let v = value.as_str().ok_or_else(kind_mismatch)?;
            let index = categories
                .iter()
                .position(|c| c == v)
                .ok_or_else(|| SpaceError::UnknownCategory {
                    dimension: dim.name.clone(),
                    value: v.to_string(),
                })?;
            Ok((index as f64 + 0.5) / categories.len() as f64)
        }
    }
}

fn denormalize(dim: &Dimension, x: f64) -> Result<Value, SpaceError> {
    if !x.is_finite() {
        return Err(SpaceError::NonFiniteCoordinate {
            dimension: dim.name.clone(),
            value: x,
        });
    }
    let x = x.clamp(0.0, 1.0);

    let value = match &dim.kind {
        DimensionKind::Real { low, high } => Value::Real((low + x * (high - low)).clamp(*low, *high)),
        DimensionKind::LogReal { low, high } => {
            let log_v = low.ln() + x * (high.ln() - low.ln());
            Value::Real(log_v.exp().clamp(*low, *high))
        }
        DimensionKind::Integer { low, high } => {
            let buckets = (high - low + 1) as f64;
            let offset = (x * buckets).floor() as i64;
            Value::Integer((low + offset).min(*high))
        }
        DimensionKind::Categorical { categories } => {
            let index = ((x * categories.len() as f64).floor() as usize).min(categories.len() - 1);
            Value::Categorical(categories[index].clone())
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> Space {
        Space::new()
            .add_categorical("mesh", ["escher", "fichera", "periodic-cube"])
            .add_real("omega", 16.0, 64.0)
            .add_integer("leaf_size", 5, 9)
            .add_log_real("tolerance", 1e-8, 1e-2)
    }

    #[test]
    fn round_trip_is_identity() {
        let space = sample_space();
        let points: Vec<Point> = vec![
            vec!["escher".into(), 16.0.into(), 5i64.into(), 1e-8.into()],
            vec!["fichera".into(), 33.3.into(), 7i64.into(), 3e-5.into()],
            vec!["periodic-cube".into(), 64.0.into(), 9i64.into(), 1e-2.into()],
        ];

        let normalized = space.transform(&points).unwrap();
        for row in &normalized {
            assert_eq!(row.len(), space.len());
            assert!(row.iter().all(|x| (0.0..=1.0).contains(x)));
        }

        let back = space.inverse_transform(&normalized).unwrap();
        for (original, restored) in points.iter().zip(&back) {
            assert_eq!(original[0], restored[0]);
            assert_eq!(original[2], restored[2]);
            for idx in [1, 3] {
                let a = original[idx].as_f64().unwrap();
                let b = restored[idx].as_f64().unwrap();
                assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn every_integer_survives_round_trip() {
        let space = Space::new().add_integer("n", -3, 12);
        for v in -3..=12 {
            let norm = space.transform_point(&[Value::Integer(v)]).unwrap();
            let back = space.inverse_transform_point(&norm).unwrap();
            assert_eq!(back, vec![Value::Integer(v)]);
        }
    }

    #[test]
    fn inverse_transform_covers_edges() {
        let space = Space::new()
            .add_integer("n", 1, 4)
            .add_categorical("c", ["a", "b"]);
        let low = space.inverse_transform_point(&[0.0, 0.0]).unwrap();
        let high = space.inverse_transform_point(&[1.0, 1.0]).unwrap();
        assert_eq!(low, vec![Value::Integer(1), Value::from("a")]);
        assert_eq!(high, vec![Value::Integer(4), Value::from("b")]);
    }

    #[test]
    fn out_of_domain_values_are_rejected() {
        let space = sample_space();
        let err = space
            .transform_point(&["escher".into(), 100.0.into(), 5i64.into(), 1e-4.into()])
            .unwrap_err();
        assert!(matches!(err, SpaceError::OutOfDomain { .. }));

        let err = space
            .transform_point(&["tetra".into(), 20.0.into(), 5i64.into(), 1e-4.into()])
            .unwrap_err();
        assert!(matches!(err, SpaceError::UnknownCategory { .. }));

        let err = space
            .transform_point(&["escher".into(), 20.0.into(), 5.5.into(), 1e-4.into()])
            .unwrap_err();
        assert!(matches!(err, SpaceError::KindMismatch { .. }));
    }

    #[test]
    fn arity_is_checked() {
        let space = sample_space();
        let err = space.inverse_transform_point(&[0.5, 0.5]).unwrap_err();
        assert_eq!(
            err,
            SpaceError::DimensionMismatch {
                expected: 4,
                found: 2
            }
        );
    }

    #[test]
    fn bind_names_coordinates() {
        let space = Space::new().add_integer("nb", 1, 8).add_real("alpha", 0.0, 1.0);
        let assignment = space.bind(&[3i64.into(), 0.25.into()]).unwrap();
        assert_eq!(assignment.get("nb"), Some(&Value::Integer(3)));
        assert_eq!(assignment["alpha"].as_f64(), Some(0.25));
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        assert!(sample_space().validate().is_ok());
        assert!(Space::new().add_real("x", 1.0, 1.0).validate().is_err());
        assert!(Space::new().add_log_real("x", 0.0, 1.0).validate().is_err());
        assert!(Space::new().add_integer("x", 3, 2).validate().is_err());
        let empty: [&str; 0] = [];
        assert!(Space::new().add_categorical("x", empty).validate().is_err());
    }

    #[test]
    fn value_serializes_untagged() {
        let point: Point = vec![3i64.into(), 0.5.into(), "lu".into()];
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, r#"[3,0.5,"lu"]"#);
        let back: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }
}
