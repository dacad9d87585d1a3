//! Geometry primitives for spatial indexing.
//!
//! Points and axis-aligned regions with the distance, containment and
//! intersection math the tree algorithms need. All operations are
//! parametric in the number of dimensions; equality is component-wise
//! exact because MBRs are reconstructed deterministically from entries.

use serde::{Deserialize, Serialize};

/// A point in d-dimensional space.
///
/// # Examples
///
/// ```
/// use irtree::geometry::Point;
///
/// let p = Point::new(vec![1.0, 2.0]);
/// assert_eq!(p.dimension(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub coords: Vec<f64>,
}

impl Point {
    pub fn new(coords: Vec<f64>) -> Point {
        Point { coords }
    }

    /// Convenience constructor for the common 2-D case.
    pub fn xy(x: f64, y: f64) -> Point {
        Point { coords: vec![x, y] }
    }

    pub fn dimension(&self) -> usize {
        self.coords.len()
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        self.coords
            .iter()
            .zip(&other.coords)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

/// An axis-aligned minimum bounding region, stored as low/high corners.
///
/// A degenerate region (`low == high`) represents a point. The infinite
/// region (`low = +inf, high = -inf` in every dimension) is the identity
/// element for [`Region::union`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

impl Region {
    /// Creates a region from its corners. `low[d] <= high[d]` must hold for
    /// every dimension.
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> Region {
        debug_assert_eq!(low.len(), high.len());
        Region { low, high }
    }

    /// The identity element for union: contains nothing, unions to the
    /// other operand.
    pub fn infinite(dimension: usize) -> Region {
        Region {
            low: vec![f64::INFINITY; dimension],
            high: vec![f64::NEG_INFINITY; dimension],
        }
    }

    /// A degenerate region covering exactly one point.
    pub fn from_point(point: &Point) -> Region {
        Region {
            low: point.coords.clone(),
            high: point.coords.clone(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.low.len()
    }

    pub fn is_infinite(&self) -> bool {
        self.low.iter().zip(&self.high).any(|(l, h)| l > h)
    }

    /// The smallest region covering both operands.
    pub fn union(&self, other: &Region) -> Region {
        Region {
            low: self
                .low
                .iter()
                .zip(&other.low)
                .map(|(a, b)| a.min(*b))
                .collect(),
            high: self
                .high
                .iter()
                .zip(&other.high)
                .map(|(a, b)| a.max(*b))
                .collect(),
        }
    }

    /// Grows this region in place to cover `other`.
    pub fn expand(&mut self, other: &Region) {
        for dim in 0..self.low.len() {
            self.low[dim] = self.low[dim].min(other.low[dim]);
            self.high[dim] = self.high[dim].max(other.high[dim]);
        }
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.low
            .iter()
            .zip(&self.high)
            .zip(other.low.iter().zip(&other.high))
            .all(|((low, high), (other_low, other_high))| {
                low <= other_high && high >= other_low
            })
    }

    pub fn contains(&self, other: &Region) -> bool {
        self.low
            .iter()
            .zip(&self.high)
            .zip(other.low.iter().zip(&other.high))
            .all(|((low, high), (other_low, other_high))| {
                low <= other_low && high >= other_high
            })
    }

    pub fn contains_point(&self, point: &Point) -> bool {
        self.low
            .iter()
            .zip(&self.high)
            .zip(&point.coords)
            .all(|((low, high), c)| low <= c && c <= high)
    }

    /// Euclidean distance from `point` to the closest face of this region,
    /// 0 if the point lies inside.
    pub fn minimum_distance(&self, point: &Point) -> f64 {
        let mut sum = 0.0;
        for dim in 0..self.low.len() {
            let c = point.coords[dim];
            let closest = c.clamp(self.low[dim], self.high[dim]);
            let d = c - closest;
            sum += d * d;
        }
        sum.sqrt()
    }

    pub fn area(&self) -> f64 {
        self.low
            .iter()
            .zip(&self.high)
            .map(|(l, h)| h - l)
            .product()
    }

    /// Sum of side lengths, the R*-tree margin measure.
    pub fn margin(&self) -> f64 {
        self.low.iter().zip(&self.high).map(|(l, h)| h - l).sum()
    }

    /// Area of the union with `other` without materializing it.
    pub fn combined_area(&self, other: &Region) -> f64 {
        self.low
            .iter()
            .zip(&self.high)
            .zip(other.low.iter().zip(&other.high))
            .map(|((low, high), (other_low, other_high))| {
                high.max(*other_high) - low.min(*other_low)
            })
            .product()
    }

    /// How much this region would have to grow to cover `other`.
    pub fn enlargement(&self, other: &Region) -> f64 {
        self.combined_area(other) - self.area()
    }

    /// Area of the overlap with `other`, 0 if disjoint.
    pub fn intersecting_area(&self, other: &Region) -> f64 {
        let mut area = 1.0;
        for dim in 0..self.low.len() {
            let low = self.low[dim].max(other.low[dim]);
            let high = self.high[dim].min(other.high[dim]);
            if low > high {
                return 0.0;
            }
            area *= high - low;
        }
        area
    }

    /// Center point of the region.
    pub fn center(&self) -> Point {
        Point {
            coords: self
                .low
                .iter()
                .zip(&self.high)
                .map(|(l, h)| (l + h) / 2.0)
                .collect(),
        }
    }
}

/// A query shape: the engine accepts points and regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Point(Point),
    Region(Region),
}

impl Shape {
    pub fn dimension(&self) -> usize {
        match self {
            Shape::Point(p) => p.dimension(),
            Shape::Region(r) => r.dimension(),
        }
    }

    /// The minimum bounding region of the shape; degenerate for points.
    pub fn mbr(&self) -> Region {
        match self {
            Shape::Point(p) => Region::from_point(p),
            Shape::Region(r) => r.clone(),
        }
    }

    pub fn intersects(&self, region: &Region) -> bool {
        match self {
            Shape::Point(p) => region.contains_point(p),
            Shape::Region(r) => r.intersects(region),
        }
    }

    pub fn contains(&self, region: &Region) -> bool {
        match self {
            Shape::Point(p) => Region::from_point(p).contains(region),
            Shape::Region(r) => r.contains(region),
        }
    }

    /// Minimum distance from this shape to a region.
    pub fn minimum_distance(&self, region: &Region) -> f64 {
        match self {
            Shape::Point(p) => region.minimum_distance(p),
            Shape::Region(r) => {
                // Minimum face-to-face distance between two regions.
                let mut sum = 0.0;
                for dim in 0..r.low.len() {
                    let d = if r.high[dim] < region.low[dim] {
                        region.low[dim] - r.high[dim]
                    } else if region.high[dim] < r.low[dim] {
                        r.low[dim] - region.high[dim]
                    } else {
                        0.0
                    };
                    sum += d * d;
                }
                sum.sqrt()
            }
        }
    }
}

impl From<Point> for Shape {
    fn from(p: Point) -> Shape {
        Shape::Point(p)
    }
}

impl From<Region> for Shape {
    fn from(r: Region) -> Shape {
        Shape::Region(r)
    }
}
