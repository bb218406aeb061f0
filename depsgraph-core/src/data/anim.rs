//! Animation curves and drivers.

use super::DataBlockId;

/// Animation attached to a data-block.
#[derive(Debug, Clone, Default)]
pub struct AnimData {
    /// Keyframed properties.
    pub fcurves: Vec<FCurve>,
    /// Driven properties.
    pub drivers: Vec<Driver>,
}

impl AnimData {
    /// Append a keyframed curve.
    pub fn with_fcurve(mut self, fcurve: FCurve) -> Self {
        self.fcurves.push(fcurve);
        self
    }

    /// Append a driver.
    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.drivers.push(driver);
        self
    }
}

/// A keyframed property curve.
#[derive(Debug, Clone, PartialEq)]
pub struct FCurve {
    /// Property path written by this curve.
    pub property: String,
    /// `(time, value)` pairs sorted by time.
    pub keyframes: Vec<(f64, f64)>,
}

impl FCurve {
    /// Create a curve; keyframes are sorted by time.
    pub fn new(property: impl Into<String>, mut keyframes: Vec<(f64, f64)>) -> Self {
        keyframes.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            property: property.into(),
            keyframes,
        }
    }

    /// Value at `time`: linear between keys, constant outside the key range.
    pub fn evaluate(&self, time: f64) -> f64 {
        let (first, last) = match (self.keyframes.first(), self.keyframes.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return 0.0,
        };
        if time <= first.0 {
            return first.1;
        }
        if time >= last.0 {
            return last.1;
        }
        for pair in self.keyframes.windows(2) {
            let (t0, v0) = pair[0];
            let (t1, v1) = pair[1];
            if time >= t0 && time <= t1 {
                if t1 == t0 {
                    return v1;
                }
                let factor = (time - t0) / (t1 - t0);
                return v0 + (v1 - v0) * factor;
            }
        }
        last.1
    }
}

/// How a driver combines its variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Mean of all variables.
    Average,
    /// Sum of all variables.
    Sum,
    /// Smallest variable.
    Min,
    /// Largest variable.
    Max,
}

impl DriverKind {
    /// Combine variable values. An empty input yields `0.0`.
    pub fn combine(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            DriverKind::Average => values.iter().sum::<f64>() / values.len() as f64,
            DriverKind::Sum => values.iter().sum(),
            DriverKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            DriverKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// A property whose value is computed from other properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    /// Property path written by the driver, on the owning data-block.
    pub property: String,
    /// Combination rule.
    pub kind: DriverKind,
    /// Inputs.
    pub variables: Vec<DriverVariable>,
}

impl Driver {
    /// A driver with no variables yet.
    pub fn new(property: impl Into<String>, kind: DriverKind) -> Self {
        Self {
            property: property.into(),
            kind,
            variables: Vec::new(),
        }
    }

    /// Add a variable reading `path` on `id`.
    pub fn reading(mut self, name: &str, id: DataBlockId, path: &str) -> Self {
        self.variables.push(DriverVariable {
            name: name.to_string(),
            target: DriverTarget::Property {
                id,
                path: path.to_string(),
            },
        });
        self
    }

    /// Add a variable reading the current time.
    pub fn reading_time(mut self, name: &str) -> Self {
        self.variables.push(DriverVariable {
            name: name.to_string(),
            target: DriverTarget::Time,
        });
        self
    }
}

/// A named driver input.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverVariable {
    /// Variable name.
    pub name: String,
    /// What it reads.
    pub target: DriverTarget,
}

/// What a driver variable reads.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverTarget {
    /// A property of some data-block's evaluated copy.
    Property {
        /// Target data-block.
        id: DataBlockId,
        /// Property path.
        path: String,
    },
    /// The evaluation time.
    Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fcurve_interpolates_and_clamps() {
        let curve = FCurve::new("location.x", vec![(10.0, 4.0), (0.0, 0.0)]);
        assert_eq!(curve.evaluate(-5.0), 0.0);
        assert_eq!(curve.evaluate(5.0), 2.0);
        assert_eq!(curve.evaluate(20.0), 4.0);
    }

    #[test]
    fn empty_curve_is_zero() {
        assert_eq!(FCurve::new("x", vec![]).evaluate(3.0), 0.0);
    }

    #[test]
    fn driver_combinations() {
        let values = [1.0, 5.0, 3.0];
        assert_eq!(DriverKind::Average.combine(&values), 3.0);
        assert_eq!(DriverKind::Sum.combine(&values), 9.0);
        assert_eq!(DriverKind::Min.combine(&values), 1.0);
        assert_eq!(DriverKind::Max.combine(&values), 5.0);
        assert_eq!(DriverKind::Max.combine(&[]), 0.0);
    }
}
