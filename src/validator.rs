use crate::my_types::*;

/// Largest absolute per-axis difference between a seed and its round trip.
pub fn forward_backward_error(p0: &Vector2d, p0r: &Vector2d) -> f64 {
    (p0 - p0r).abs().max()
}

/// Decide which seeds survive.
///
/// `forward[i]` is where `seeds[i]` went in the next frame and `backward[i]`
/// where that point maps back to. A missing result on either pass rejects
/// the point. Returns the forward position of kept points, `None` for
/// rejected ones. The error has to be strictly below `threshold`.
pub fn validate(
    seeds: &[Vector2d],
    forward: &[Option<Vector2d>],
    backward: &[Option<Vector2d>],
    threshold: f64,
) -> Vec<Option<Vector2d>> {
    assert_eq!(seeds.len(), forward.len());
    assert_eq!(seeds.len(), backward.len());

    seeds
        .iter()
        .zip(forward.iter().zip(backward.iter()))
        .map(|(p0, results)| match results {
            (Some(p1), Some(p0r)) if forward_backward_error(p0, p0r) < threshold => Some(*p1),
            _ => None,
        })
        .collect()
}
