//! Ear-clipping triangulation of simple polygons.

use crate::coords::Vec2;

/// Twice the signed area; positive when the winding is clockwise on screen (+Y down).
pub fn signed_area2(points: &[Vec2]) -> f32 {
    let n = points.len();
    (0..n).map(|i| points[i].cross(points[(i + 1) % n])).sum()
}

fn in_triangle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    let d1 = (b - a).cross(p - a);
    let d2 = (c - b).cross(p - b);
    let d3 = (a - c).cross(p - c);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Triangulates `points` by ear clipping, appending vertex index triples to `out`.
///
/// Simple polygons of `n` vertices yield `n - 2` triangles. When no ear can
/// be found (self-intersecting or degenerate input) clipping stops and the
/// first three remaining vertices close the fill, so output is best-effort
/// but the call always terminates. Inputs with more points than `u16` can
/// index produce nothing. Returns the number of triangles appended.
pub fn ear_clip(points: &[Vec2], out: &mut Vec<[u16; 3]>) -> usize {
    let n = points.len();
    if n < 3 {
        return 0;
    }
    let Ok(last) = u16::try_from(n - 1) else {
        return 0;
    };
    let start = out.len();
    let winding = signed_area2(points).signum();
    let mut remaining: Vec<u16> = (0..=last).collect();

    let mut i = 0;
    let mut attempts = 0;
    while remaining.len() > 3 {
        let len = remaining.len();
        if attempts > 3 * len {
            break;
        }
        let ia = remaining[(i + len - 1) % len];
        let ib = remaining[i % len];
        let ic = remaining[(i + 1) % len];
        let (a, b, c) = (points[ia as usize], points[ib as usize], points[ic as usize]);

        let convex = (b - a).cross(c - b) * winding > 0.0;
        let ear = convex
            && !remaining
                .iter()
                .filter(|&&k| k != ia && k != ib && k != ic)
                .any(|&k| in_triangle(points[k as usize], a, b, c));

        if ear {
            out.push([ia, ib, ic]);
            remaining.remove(i % len);
            attempts = 0;
            if i >= remaining.len() {
                i = 0;
            }
        } else {
            i = (i + 1) % len;
            attempts += 1;
        }
    }
    out.push([remaining[0], remaining[1], remaining[2]]);
    out.len() - start
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(points: &[Vec2], tris: &[[u16; 3]]) -> f32 {
        tris.iter()
            .map(|t| {
                let (a, b, c) = (points[t[0] as usize], points[t[1] as usize], points[t[2] as usize]);
                ((b - a).cross(c - a) * 0.5).abs()
            })
            .sum()
    }

    #[test]
    fn square_gives_two_triangles() {
        let pts = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
        let mut out = Vec::new();
        assert_eq!(ear_clip(&pts, &mut out), 2);
        assert!((area(&pts, &out) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn concave_polygon_covers_exact_area() {
        // L shape, area 3.
        let pts = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        let mut out = Vec::new();
        assert_eq!(ear_clip(&pts, &mut out), 4);
        assert!((area(&pts, &out) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn winding_does_not_matter() {
        let mut pts = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        pts.reverse();
        let mut out = Vec::new();
        assert_eq!(ear_clip(&pts, &mut out), 4);
        assert!((area(&pts, &out) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn self_intersecting_input_terminates() {
        // Bow tie.
        let pts = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
        let mut out = Vec::new();
        let n = ear_clip(&pts, &mut out);
        assert!((1..=2).contains(&n));
    }

    #[test]
    fn collinear_input_closes_with_one_triangle() {
        let pts = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0), Vec2::new(3.0, 0.0)];
        let mut out = Vec::new();
        assert_eq!(ear_clip(&pts, &mut out), 1);
    }

    #[test]
    fn many_sided_star_splits_into_n_minus_two() {
        let n = 64;
        let step = std::f32::consts::TAU / n as f32;
        let pts: Vec<Vec2> = (0..n)
            .map(|i| {
                let r = if i % 2 == 0 { 10.0 } else { 4.0 };
                let a = step * i as f32;
                Vec2::new(r * a.cos(), r * a.sin())
            })
            .collect();
        let mut out = Vec::new();
        assert_eq!(ear_clip(&pts, &mut out), n - 2);

        let expected = signed_area2(&pts).abs() * 0.5;
        assert!((area(&pts, &out) - expected).abs() < expected * 1e-4);
        assert!(out.iter().flatten().all(|&i| (i as usize) < n));
    }

    #[test]
    fn full_index_range_terminates() {
        // Collinear, so no ear exists and clipping gives up after the attempt limit.
        let pts: Vec<Vec2> = (0..65536).map(|i| Vec2::new(i as f32, 0.0)).collect();
        let mut out = Vec::new();
        assert_eq!(ear_clip(&pts, &mut out), 1);
        assert_eq!(out[0], [0, 1, 2]);
    }

    #[test]
    fn more_points_than_u16_indices_yield_nothing() {
        let pts = vec![Vec2::zero(); 65537];
        let mut out = Vec::new();
        assert_eq!(ear_clip(&pts, &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn too_few_points() {
        let mut out = Vec::new();
        assert_eq!(ear_clip(&[Vec2::zero(), Vec2::new(1.0, 0.0)], &mut out), 0);
    }
}
