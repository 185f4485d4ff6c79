use std::fmt;
use std::ops::{Add, Mul, Sub};

/// Tolerance used by every floating point equality check on volumes.
pub const EPSILON: f64 = 1e-6;

pub fn almost_equals(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// An immutable quantity vector over the liquids of a problem.
///
/// A container's content is a composition whose sum equals the container's
/// capacity; the target is a composition of proportions. Sum, length and the
/// unit-length normal are computed once at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Composition {
    values: Vec<f64>,
    sum: f64,
    length: f64,
    normal: Vec<f64>,
}

impl Composition {
    pub fn new(values: Vec<f64>) -> Self {
        let sum = values.iter().sum();
        let length = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        // Near-zero and already-unit vectors are their own normal.
        let normal = if almost_equals(length, 0.0) || almost_equals(length, 1.0) {
            values.clone()
        } else {
            values.iter().map(|v| v / length).collect()
        };
        Self {
            values,
            sum,
            length,
            normal,
        }
    }

    pub fn zero(liquids: usize) -> Self {
        Self::new(vec![0.0; liquids])
    }

    /// A unit quantity of a single liquid.
    pub fn pure(liquid: usize, liquids: usize) -> Self {
        let mut values = vec![0.0; liquids];
        values[liquid] = 1.0;
        Self::new(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn normal(&self) -> &[f64] {
        &self.normal
    }

    /// The same proportions scaled so the quantities add up to one.
    pub fn sum_normalized(&self) -> Composition {
        if almost_equals(self.sum, 0.0) || almost_equals(self.sum, 1.0) {
            return self.clone();
        }
        self.scale(1.0 / self.sum)
    }

    pub fn scale(&self, factor: f64) -> Composition {
        Self::new(self.values.iter().map(|v| v * factor).collect())
    }

    pub fn lerp(&self, other: &Composition, amount: f64) -> Composition {
        debug_assert_eq!(self.len(), other.len());
        Self::new(
            self.values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| a * (1.0 - amount) + b * amount)
                .collect(),
        )
    }

    /// Blends two compositions by proportion, weighting each by its volume.
    /// The result holds `w1 + w2` units.
    pub fn combine(m1: &Composition, w1: f64, m2: &Composition, w2: f64) -> Composition {
        let total = w1 + w2;
        if almost_equals(total, 0.0) {
            return Composition::zero(m1.len());
        }
        m1.sum_normalized()
            .lerp(&m2.sum_normalized(), w2 / total)
            .scale(total)
    }

    /// Euclidean distance to `other`; an absent mix is as far away as possible.
    pub fn distance(&self, other: Option<&Composition>) -> f64 {
        match other {
            None => f64::MAX,
            Some(other) => (other - self).length(),
        }
    }

    /// Distance between directions only, ignoring quantity.
    pub fn distance_of_normals(&self, other: Option<&Composition>) -> f64 {
        match other {
            None => f64::MAX,
            Some(other) => {
                debug_assert_eq!(self.len(), other.len());
                self.normal
                    .iter()
                    .zip(&other.normal)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt()
            }
        }
    }

    /// Number of liquids present in a non-zero amount.
    pub fn used_liquids(&self) -> usize {
        self.values.iter().filter(|v| **v > 0.0).count()
    }

    /// Component-wise mean of the present mixes, `None` if there are none.
    pub fn average<'a>(mixes: impl IntoIterator<Item = &'a Composition>) -> Option<Composition> {
        let mut total: Option<Composition> = None;
        let mut count = 0usize;
        for mix in mixes {
            total = Some(match total {
                None => mix.clone(),
                Some(acc) => &acc + mix,
            });
            count += 1;
        }
        total.map(|t| t.scale(1.0 / count as f64))
    }
}

impl Add for &Composition {
    type Output = Composition;

    fn add(self, rhs: &Composition) -> Composition {
        debug_assert_eq!(self.len(), rhs.len());
        Composition::new(self.values.iter().zip(&rhs.values).map(|(a, b)| a + b).collect())
    }
}

impl Sub for &Composition {
    type Output = Composition;

    fn sub(self, rhs: &Composition) -> Composition {
        debug_assert_eq!(self.len(), rhs.len());
        Composition::new(self.values.iter().zip(&rhs.values).map(|(a, b)| a - b).collect())
    }
}

impl Mul<f64> for &Composition {
    type Output = Composition;

    fn mul(self, rhs: f64) -> Composition {
        self.scale(rhs)
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values.iter().map(|v| format!("{v:.3}")).collect();
        write!(f, "({})", parts.join(", "))
    }
}
