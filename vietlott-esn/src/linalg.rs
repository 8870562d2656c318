use anyhow::{anyhow, Result};
use faer::prelude::Solve;
use faer::{Mat, Side};
use ndarray::Array2;

fn to_faer(arr: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(arr.nrows(), arr.ncols(), |i, j| arr[[i, j]])
}

fn from_faer(mat: &Mat<f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

/// X such that A * X = B, A symmetric positive-definite.
fn solve_spd(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let llt = to_faer(a)
        .llt(Side::Lower)
        .map_err(|_| anyhow!("Cholesky: matrix not positive-definite"))?;
    Ok(from_faer(&llt.solve(&to_faer(b))))
}

fn add_ridge(m: &mut Array2<f64>, lambda: f64) {
    for i in 0..m.nrows() {
        m[[i, i]] += lambda;
    }
}

/// Ridge readout W minimizing |W*H - Y|² + lambda*|W|².
///
/// - h: [feature_dim, T], one column per sample
/// - y: [output_dim, T]
/// - returns W: [output_dim, feature_dim]
///
/// Solves the smaller of the d×d (primal) and T×T (dual) systems.
pub fn ridge_regression(h: &Array2<f64>, y: &Array2<f64>, lambda: f64) -> Result<Array2<f64>> {
    let (d, t) = h.dim();
    if y.ncols() != t {
        return Err(anyhow!("ridge: {} samples in H but {} in Y", t, y.ncols()));
    }

    if t < d {
        // W = (H * (HᵀH + λI)⁻¹ Yᵀ)ᵀ
        let mut gram = h.t().dot(h);
        add_ridge(&mut gram, lambda);
        let z = solve_spd(&gram, &y.t().to_owned())?;
        Ok(h.dot(&z).reversed_axes())
    } else {
        // Wᵀ = (HHᵀ + λI)⁻¹ H Yᵀ
        let mut cov = h.dot(&h.t());
        add_ridge(&mut cov, lambda);
        let rhs = h.dot(&y.t());
        Ok(solve_spd(&cov, &rhs)?.reversed_axes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_exact_fit_primal() {
        // W*H = Y with H = [[1,2],[1,0]], Y = [[5,2]] gives W = [[1,4]]
        let h = array![[1.0, 2.0], [1.0, 0.0]];
        let y = array![[5.0, 2.0]];
        let w = ridge_regression(&h, &y, 1e-9).unwrap();
        assert_eq!(w.shape(), &[1, 2]);
        assert!((w[[0, 0]] - 1.0).abs() < 1e-4);
        assert!((w[[0, 1]] - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_dual_matches_primal() {
        // Identical problem through both paths: pad H with zero rows to force the dual.
        let h = Array2::from_shape_fn((3, 4), |(i, j)| ((i + 2 * j) % 5) as f64 + 0.5);
        let y = Array2::from_shape_fn((2, 4), |(i, j)| (i + j) as f64);
        let primal = ridge_regression(&h, &y, 0.1).unwrap();

        let mut tall = Array2::zeros((6, 4));
        tall.slice_mut(ndarray::s![..3, ..]).assign(&h);
        let dual = ridge_regression(&tall, &y, 0.1).unwrap();
        assert_eq!(dual.shape(), &[2, 6]);
        for i in 0..2 {
            for j in 0..3 {
                assert!((primal[[i, j]] - dual[[i, j]]).abs() < 1e-8);
            }
            for j in 3..6 {
                assert!(dual[[i, j]].abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_shrinks_with_lambda() {
        let h = array![[1.0, 2.0, 3.0], [0.5, 0.1, 0.3]];
        let y = array![[1.0, 2.0, 3.0]];
        let loose = ridge_regression(&h, &y, 1e-6).unwrap();
        let tight = ridge_regression(&h, &y, 100.0).unwrap();
        let norm = |w: &Array2<f64>| w.iter().map(|v| v * v).sum::<f64>();
        assert!(norm(&tight) < norm(&loose));
    }

    #[test]
    fn test_sample_count_mismatch() {
        let h = Array2::<f64>::zeros((2, 3));
        let y = Array2::<f64>::zeros((1, 4));
        assert!(ridge_regression(&h, &y, 1.0).is_err());
    }
}
