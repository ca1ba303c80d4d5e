//! Key spans
//!
//! A [`Span`] is an inclusive range of primary key values, always stored
//! with `lower <= upper` in natural value order. Pool order only matters
//! when asking which end comes *first*, so the order-aware helpers take an
//! [`Order`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{Order, Value};

/// Inclusive key range `[lower..upper]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub lower: Value,
    pub upper: Value,
}

impl Span {
    /// Build a span from two endpoints in either order
    pub fn new(a: Value, b: Value) -> Self {
        if a <= b {
            Self { lower: a, upper: b }
        } else {
            Self { lower: b, upper: a }
        }
    }

    /// Span from `from` to the end of the key space (nulls sort max)
    pub fn starting_at(from: Value) -> Self {
        Self::new(from, Value::Null)
    }

    /// The endpoint a scan in `order` reaches first
    pub fn first(&self, order: Order) -> &Value {
        match order {
            Order::Asc => &self.lower,
            Order::Desc => &self.upper,
        }
    }

    /// The endpoint a scan in `order` reaches last
    pub fn last(&self, order: Order) -> &Value {
        match order {
            Order::Asc => &self.upper,
            Order::Desc => &self.lower,
        }
    }

    pub fn contains(&self, v: &Value) -> bool {
        *v >= self.lower && *v <= self.upper
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.lower <= other.upper && other.lower <= self.upper
    }

    /// Whether `other` lies entirely within this span
    pub fn covers(&self, other: &Span) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }

    /// Grow to include `other`
    pub fn extend(&mut self, other: &Span) {
        if other.lower < self.lower {
            self.lower = other.lower.clone();
        }
        if other.upper > self.upper {
            self.upper = other.upper.clone();
        }
    }

    /// The overlap of two spans, if any
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        if !self.overlaps(other) {
            return None;
        }
        let lower = std::cmp::max(&self.lower, &other.lower).clone();
        let upper = std::cmp::min(&self.upper, &other.upper).clone();
        Some(Span { lower, upper })
    }

    /// Compare where two spans start when scanning in `order`
    pub fn cmp_first(&self, other: &Span, order: Order) -> Ordering {
        order.apply(self.first(order).cmp(other.first(order)))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.lower, self.upper)
    }
}
