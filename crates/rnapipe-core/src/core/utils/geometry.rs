use nalgebra::{Matrix3, Point3, Vector3};

pub fn centroid(coords: &[Point3<f64>]) -> Option<Point3<f64>> {
    if coords.is_empty() {
        return None;
    }
    let sum: Vector3<f64> = coords.iter().map(|p| p.coords).sum();
    Some(Point3::from(sum / coords.len() as f64))
}

pub fn calculate_rmsd(coords1: &[Point3<f64>], coords2: &[Point3<f64>]) -> Option<f64> {
    if coords1.len() != coords2.len() || coords1.is_empty() {
        return None;
    }
    let n = coords1.len() as f64;
    let squared_dist_sum: f64 = coords1
        .iter()
        .zip(coords2.iter())
        .map(|(p1, p2)| (p1 - p2).norm_squared())
        .sum();
    Some((squared_dist_sum / n).sqrt())
}

/// Computes the optimal rotation that superimposes `mobile` onto `target` after both point
/// sets have been centered on their centroids (Kabsch algorithm).
///
/// The returned rotation is proper (determinant +1); reflections are never produced.
///
/// # Arguments
///
/// * `mobile` - Centered coordinates to be rotated.
/// * `target` - Centered reference coordinates, same length as `mobile`.
///
/// # Return
///
/// Returns `None` if the point sets differ in length, are empty, or the SVD of the
/// cross-covariance matrix cannot be computed.
pub fn optimal_rotation(mobile: &[Vector3<f64>], target: &[Vector3<f64>]) -> Option<Matrix3<f64>> {
    if mobile.len() != target.len() || mobile.is_empty() {
        return None;
    }

    let covariance: Matrix3<f64> = mobile
        .iter()
        .zip(target.iter())
        .map(|(a, b)| a * b.transpose())
        .sum();

    let svd = covariance.svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();

    let d = (v * u.transpose()).determinant().signum();
    let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));

    Some(v * correction * u.transpose())
}

/// Returns the minimum achievable root-mean-square deviation between two equal-length point
/// lists over all rigid-body motions (translation plus proper rotation).
///
/// # Arguments
///
/// * `coords1` - First point list.
/// * `coords2` - Second point list, paired index-by-index with `coords1`.
///
/// # Return
///
/// Returns `None` if the lists have different lengths, are empty, or the superposition
/// cannot be computed.
pub fn superposed_rmsd(coords1: &[Point3<f64>], coords2: &[Point3<f64>]) -> Option<f64> {
    let c1 = centroid(coords1)?;
    let c2 = centroid(coords2)?;
    if coords1.len() != coords2.len() {
        return None;
    }

    let centered1: Vec<Vector3<f64>> = coords1.iter().map(|p| p - c1).collect();
    let centered2: Vec<Vector3<f64>> = coords2.iter().map(|p| p - c2).collect();

    let rotation = optimal_rotation(&centered1, &centered2)?;

    let rotated: Vec<Point3<f64>> = centered1.iter().map(|a| Point3::from(rotation * a)).collect();
    let target: Vec<Point3<f64>> = centered2.into_iter().map(Point3::from).collect();

    let rmsd = calculate_rmsd(&rotated, &target)?;
    rmsd.is_finite().then_some(rmsd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Translation3, Unit};

    const EPS: f64 = 1e-9;

    fn sample_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(0.0, 3.0, 0.0),
            Point3::new(0.0, 0.0, 3.0),
            Point3::new(2.0, 2.0, 1.0),
            Point3::new(-1.0, 2.0, 3.0),
        ]
    }

    #[test]
    fn centroid_of_empty_set_is_none() {
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn centroid_is_mean_position() {
        let pts = [Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 4.0, -6.0)];
        let c = centroid(&pts).unwrap();
        assert!((c - Point3::new(1.0, 2.0, -3.0)).norm() < EPS);
    }

    #[test]
    fn calculate_rmsd_rejects_mismatched_lengths() {
        let a = sample_points();
        assert!(calculate_rmsd(&a, &a[..3]).is_none());
    }

    #[test]
    fn superposed_rmsd_of_identical_sets_is_zero() {
        let a = sample_points();
        let rmsd = superposed_rmsd(&a, &a).unwrap();
        assert!(rmsd < 1e-6);
    }

    #[test]
    fn superposed_rmsd_is_invariant_under_rigid_motion() {
        let a = sample_points();
        let rotation = Rotation3::from_axis_angle(
            &Unit::new_normalize(Vector3::new(0.3, -1.0, 0.7)),
            1.1,
        );
        let translation = Translation3::new(12.0, -4.5, 7.25);
        let b: Vec<_> = a
            .iter()
            .map(|p| translation.transform_point(&(rotation * p)))
            .collect();

        assert!(calculate_rmsd(&a, &b).unwrap() > 1.0);
        assert!(superposed_rmsd(&a, &b).unwrap() < 1e-6);
    }

    #[test]
    fn superposed_rmsd_does_not_use_reflections() {
        let a = sample_points();
        let mirrored: Vec<_> = a.iter().map(|p| Point3::new(-p.x, p.y, p.z)).collect();
        assert!(superposed_rmsd(&a, &mirrored).unwrap() > 0.1);
    }

    #[test]
    fn superposed_rmsd_never_exceeds_plain_rmsd() {
        let a = sample_points();
        let b: Vec<_> = a
            .iter()
            .enumerate()
            .map(|(i, p)| p + Vector3::new(0.1 * i as f64, -0.2, 0.05 * (i * i) as f64))
            .collect();
        let plain = calculate_rmsd(&a, &b).unwrap();
        let fitted = superposed_rmsd(&a, &b).unwrap();
        assert!(fitted <= plain + EPS);
    }

    #[test]
    fn superposed_rmsd_rejects_mismatched_or_empty_input() {
        let a = sample_points();
        assert!(superposed_rmsd(&a, &a[..4]).is_none());
        assert!(superposed_rmsd(&[], &[]).is_none());
    }
}
