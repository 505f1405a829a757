//! Topology-preserving Douglas-Peucker simplification for 2D polylines.
//!
//! A section `[i, j]` collapses to the chord `i -> j` only when every
//! interior point is within `tolerance` of the chord *and* the chord does
//! not cross any input segment outside the section or any chord already
//! emitted. Otherwise the section splits at its furthest point. Closed
//! rings keep at least four points.

pub type Point2 = [f64; 2];

#[inline]
fn cross(o: Point2, a: Point2, b: Point2) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

#[inline]
fn within_box(p: Point2, a: Point2, b: Point2) -> bool {
    p[0] >= a[0].min(b[0])
        && p[0] <= a[0].max(b[0])
        && p[1] >= a[1].min(b[1])
        && p[1] <= a[1].max(b[1])
}

/// Distance from `p` to segment `a-b`.
pub fn segment_distance(p: Point2, a: Point2, b: Point2) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let len_sq = dx * dx + dy * dy;
    if len_sq < 1e-18 {
        return (p[0] - a[0]).hypot(p[1] - a[1]);
    }
    let t = (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len_sq).clamp(0.0, 1.0);
    (p[0] - (a[0] + t * dx)).hypot(p[1] - (a[1] + t * dy))
}

/// True when `a-b` and `c-d` meet anywhere other than at a shared endpoint.
pub fn segments_interfere(a: Point2, b: Point2, c: Point2, d: Point2) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    // Touching or collinear overlap: an endpoint lying on the other segment
    // counts unless it is an endpoint of both.
    let touches = |p: Point2, o: f64, s0: Point2, s1: Point2| {
        o == 0.0 && within_box(p, s0, s1) && p != s0 && p != s1
    };
    touches(a, d1, c, d) || touches(b, d2, c, d) || touches(c, d3, a, b) || touches(d, d4, a, b)
}

fn furthest(points: &[Point2], i: usize, j: usize) -> (usize, f64) {
    let mut best = (i, -1.0);
    for k in i + 1..j {
        let d = segment_distance(points[k], points[i], points[j]);
        if d > best.1 {
            best = (k, d);
        }
    }
    best
}

/// Simplify `points` with distance `tolerance`, keeping both endpoints and
/// never introducing an intersection the input did not have.
pub fn simplify(points: &[Point2], tolerance: f64) -> Vec<Point2> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let closed = n >= 4 && points[0] == points[n - 1];

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;
    let mut kept = 2;

    let mut chords: Vec<(usize, usize)> = Vec::new();
    let mut stack = vec![(0usize, n - 1)];

    while let Some((i, j)) = stack.pop() {
        if j <= i + 1 {
            chords.push((i, j));
            continue;
        }
        let (idx, dist) = furthest(points, i, j);

        let split = dist > tolerance
            || (closed && kept < 4)
            || chord_conflicts(points, &chords, i, j);

        if split {
            keep[idx] = true;
            kept += 1;
            // Left half is processed first so chords are emitted in order.
            stack.push((idx, j));
            stack.push((i, idx));
        } else {
            chords.push((i, j));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn chord_conflicts(points: &[Point2], chords: &[(usize, usize)], i: usize, j: usize) -> bool {
    let (a, b) = (points[i], points[j]);

    let input_hit = (0..points.len() - 1)
        .filter(|&k| k < i || k >= j)
        .any(|k| segments_interfere(a, b, points[k], points[k + 1]));

    input_hit
        || chords
            .iter()
            .any(|&(s, e)| segments_interfere(a, b, points[s], points[e]))
}
