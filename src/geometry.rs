// 📐 Polygon Centroid Calculator
// Shoelace formula over one or more coordinate rings.
//
//   A  = ½ · Σ (xᵢ·yᵢ₊₁ − xᵢ₊₁·yᵢ)
//   Cx = Σ (xᵢ + xᵢ₊₁)(xᵢ·yᵢ₊₁ − xᵢ₊₁·yᵢ) / (6·A)
//   Cy = Σ (yᵢ + yᵢ₊₁)(xᵢ·yᵢ₊₁ − xᵢ₊₁·yᵢ) / (6·A)
//
// Traversal is OPEN: the segment from the last point back to the first is
// not part of the sums. GeoJSON rings repeat their first point at the end,
// so for well-formed input the result is the exact polygon centroid.

use serde::{Deserialize, Serialize};

/// [longitude, latitude]
pub type Coordinate = [f64; 2];

/// One polygon ring as it appears in the boundary file
pub type Ring = Vec<Coordinate>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub longitude: f64,
    pub latitude: f64,
}

impl Centroid {
    /// Placeholder for polygons without area
    pub fn undefined() -> Self {
        Centroid {
            longitude: f64::NAN,
            latitude: f64::NAN,
        }
    }

    /// False when the polygon had zero area
    pub fn is_defined(&self) -> bool {
        self.longitude.is_finite() && self.latitude.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolygonSummary {
    pub signed_area: f64,
    pub centroid: Centroid,
}

/// Cross term xᵢ·yᵢ₊₁ − xᵢ₊₁·yᵢ of one segment
fn cross(a: &Coordinate, b: &Coordinate) -> f64 {
    a[0] * b[1] - b[0] * a[1]
}

/// Consecutive point pairs of every ring, without the wrap-around segment.
/// Rings with fewer than two points yield nothing.
fn segments(rings: &[Ring]) -> impl Iterator<Item = (&Coordinate, &Coordinate)> {
    rings
        .iter()
        .flat_map(|ring| ring.windows(2).map(|pair| (&pair[0], &pair[1])))
}

pub fn signed_area(rings: &[Ring]) -> f64 {
    segments(rings).map(|(a, b)| cross(a, b)).sum::<f64>() / 2.0
}

pub fn centroid(rings: &[Ring]) -> Centroid {
    summarize(rings).centroid
}

/// Area and centroid in one pass over the rings
pub fn summarize(rings: &[Ring]) -> PolygonSummary {
    let mut twice_area = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;

    for (a, b) in segments(rings) {
        let c = cross(a, b);
        twice_area += c;
        sum_x += (a[0] + b[0]) * c;
        sum_y += (a[1] + b[1]) * c;
    }

    let signed_area = twice_area / 2.0;

    // 0/0 and x/0 would give NaN or ±inf; both mean "no centroid"
    let centroid = if signed_area == 0.0 {
        Centroid::undefined()
    } else {
        Centroid {
            longitude: sum_x / (6.0 * signed_area),
            latitude: sum_y / (6.0 * signed_area),
        }
    };

    PolygonSummary {
        signed_area,
        centroid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_unit_square_open_traversal() {
        let rings = vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]];

        let summary = summarize(&rings);

        // Closing edge (0,1)->(0,0) has a zero cross term, so area is exact
        assert!((summary.signed_area - 1.0).abs() < EPS);
        assert!((summary.centroid.longitude - 0.5).abs() < EPS);
        assert!((summary.centroid.latitude - 0.5).abs() < EPS);

        println!("✅ Unit square test PASSED: {:?}", summary);
    }

    #[test]
    fn test_last_edge_is_excluded() {
        // Offset square: the missing closing edge contributes -1 to 2A
        let rings = vec![vec![[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0]]];

        let summary = summarize(&rings);

        assert!((summary.signed_area - 1.5).abs() < EPS);
        assert!((summary.centroid.longitude - 11.0 / 9.0).abs() < EPS);
        assert!((summary.centroid.latitude - 12.0 / 9.0).abs() < EPS);
    }

    #[test]
    fn test_closed_ring_gives_analytic_centroid() {
        let rings = vec![vec![
            [13.0, 52.0],
            [13.2, 52.0],
            [13.2, 52.2],
            [13.0, 52.2],
            [13.0, 52.0],
        ]];

        let summary = summarize(&rings);

        assert!((summary.signed_area - 0.04).abs() < 1e-9);
        assert!((summary.centroid.longitude - 13.1).abs() < 1e-9);
        assert!((summary.centroid.latitude - 52.1).abs() < 1e-9);
    }

    #[test]
    fn test_clockwise_ring_has_negative_area_same_centroid() {
        let rings = vec![vec![
            [0.0, 0.0],
            [0.0, 2.0],
            [2.0, 2.0],
            [2.0, 0.0],
            [0.0, 0.0],
        ]];

        let summary = summarize(&rings);

        assert!((summary.signed_area + 4.0).abs() < EPS);
        assert!((summary.centroid.longitude - 1.0).abs() < EPS);
        assert!((summary.centroid.latitude - 1.0).abs() < EPS);
    }

    #[test]
    fn test_short_rings_contribute_nothing() {
        let square = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let with_noise = vec![square.clone(), vec![], vec![[5.0, 5.0]]];

        assert_eq!(summarize(&[square]), summarize(&with_noise));
        assert_eq!(signed_area(&[vec![], vec![[3.0, 4.0]]]), 0.0);
    }

    #[test]
    fn test_zero_area_centroid_is_undefined() {
        let degenerate = vec![vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]];
        let empty: Vec<Ring> = Vec::new();

        let c1 = centroid(&degenerate);
        let c2 = centroid(&empty);

        assert!(!c1.is_defined());
        assert!(c1.longitude.is_nan() && c1.latitude.is_nan());
        assert!(!c2.is_defined());

        println!("✅ Zero area test PASSED: no panic, centroid undefined");
    }

    #[test]
    fn test_multiple_rings_are_summed() {
        let a = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]];
        let b = vec![[2.0, 0.0], [3.0, 0.0], [3.0, 1.0], [2.0, 1.0], [2.0, 0.0]];

        let summary = summarize(&[a, b]);

        assert!((summary.signed_area - 2.0).abs() < EPS);
        assert!((summary.centroid.longitude - 1.5).abs() < EPS);
        assert!((summary.centroid.latitude - 0.5).abs() < EPS);
    }
}
