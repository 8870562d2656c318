use ndarray::linalg::general_mat_vec_mul;
use ndarray::{Array1, Array2};
use rand::distr::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, RngExt, SeedableRng};
use sprs::{CsMat, TriMat};

use crate::config::EsnConfig;

/// Fixed random recurrent network. Weights never change after construction;
/// only the linear readout on top of it is trained.
pub struct Reservoir {
    pub w_in: Array2<f64>,
    pub w_res: CsMat<f64>,
    pub leaking_rate: f64,
    pub noise_amplitude: f64,
}

impl Reservoir {
    /// Same seed, same reservoir. Trained artifacts rely on this to avoid
    /// storing the recurrent weights.
    pub fn from_config(input_dim: usize, config: &EsnConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        Self::generate(input_dim, config, &mut rng)
    }

    pub fn generate(input_dim: usize, config: &EsnConfig, rng: &mut impl Rng) -> Self {
        let n = config.reservoir_size;
        let scaling = config.input_scaling.abs();
        let w_in = match Uniform::new_inclusive(-scaling, scaling) {
            Ok(dist) => Array2::from_shape_fn((n, input_dim), |_| rng.sample(dist)),
            Err(_) => Array2::zeros((n, input_dim)),
        };

        // Non-zeros drawn directly in triplet form; the dense matrix is never built.
        let mut entries: Vec<(usize, usize, f64)> = Vec::new();
        if let Ok(dist) = Uniform::new(-1.0, 1.0) {
            for i in 0..n {
                for j in 0..n {
                    if rng.random::<f64>() >= config.sparsity {
                        entries.push((i, j, rng.sample(dist)));
                    }
                }
            }
        }

        let rho = power_iteration(n, |v| sparse_mul(&entries, v), rng);
        let scale = if rho > 1e-10 { config.spectral_radius / rho } else { 1.0 };

        let mut tri = TriMat::new((n, n));
        for &(i, j, v) in &entries {
            tri.add_triplet(i, j, v * scale);
        }

        Reservoir {
            w_in,
            w_res: tri.to_csr(),
            leaking_rate: config.leaking_rate,
            noise_amplitude: config.noise_amplitude,
        }
    }

    pub fn size(&self) -> usize {
        self.w_in.nrows()
    }

    pub fn input_dim(&self) -> usize {
        self.w_in.ncols()
    }

    /// h(t) = (1-a)*h(t-1) + a*tanh(W_in*x + W_res*h(t-1)) + noise
    /// `buf` is scratch space of reservoir size.
    pub fn step(&self, state: &mut Array1<f64>, input: &Array1<f64>, buf: &mut Array1<f64>, rng: &mut impl Rng) {
        general_mat_vec_mul(1.0, &self.w_in, input, 0.0, buf);
        for (row, row_vec) in self.w_res.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                buf[row] += val * state[col];
            }
        }

        let a = self.leaking_rate;
        state.zip_mut_with(&*buf, |h, &pre| {
            *h = *h * (1.0 - a) + pre.tanh() * a;
        });

        if self.noise_amplitude > 0.0 {
            if let Ok(noise) = Uniform::new(-self.noise_amplitude, self.noise_amplitude) {
                for v in state.iter_mut() {
                    *v += rng.sample(noise);
                }
            }
        }
    }

    /// Runs a whole sequence from the zero state and returns the final state.
    pub fn final_state(&self, inputs: &[Array1<f64>], rng: &mut impl Rng) -> Array1<f64> {
        let mut state = Array1::zeros(self.size());
        let mut buf = Array1::zeros(self.size());
        for input in inputs {
            self.step(&mut state, input, &mut buf, rng);
        }
        state
    }
}

fn sparse_mul(entries: &[(usize, usize, f64)], v: &Array1<f64>) -> Array1<f64> {
    let mut out = Array1::zeros(v.len());
    for &(i, j, w) in entries {
        out[i] += w * v[j];
    }
    out
}

/// Estimate the spectral radius of an n×n operator given as a mat-vec product.
pub fn power_iteration(n: usize, matvec: impl Fn(&Array1<f64>) -> Array1<f64>, rng: &mut impl Rng) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let Ok(dist) = Uniform::new(-1.0, 1.0) else {
        return 0.0;
    };
    let mut v: Array1<f64> = Array1::from_shape_fn(n, |_| rng.sample(dist));
    let norm = v.dot(&v).sqrt();
    if norm < 1e-15 {
        return 0.0;
    }
    v /= norm;

    let mut lambda = 0.0;
    for _ in 0..200 {
        let wv = matvec(&v);
        let next = wv.dot(&wv).sqrt();
        if next < 1e-15 {
            return 0.0;
        }
        v = wv / next;
        if (next - lambda).abs() < 1e-10 {
            return next;
        }
        lambda = next;
    }
    lambda
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(size: usize, sparsity: f64, leaking_rate: f64) -> EsnConfig {
        EsnConfig {
            reservoir_size: size,
            sparsity,
            leaking_rate,
            noise_amplitude: 0.0,
            ..EsnConfig::default()
        }
    }

    fn dense(sparse: &CsMat<f64>) -> Array2<f64> {
        let (rows, cols) = sparse.shape();
        let mut out = Array2::zeros((rows, cols));
        for (row, row_vec) in sparse.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                out[[row, col]] = val;
            }
        }
        out
    }

    #[test]
    fn test_shapes() {
        let r = Reservoir::from_config(45, &small_config(60, 0.9, 0.3));
        assert_eq!(r.w_in.shape(), &[60, 45]);
        assert_eq!(r.w_res.shape(), (60, 60));
        assert_eq!(r.size(), 60);
        assert_eq!(r.input_dim(), 45);
    }

    #[test]
    fn test_spectral_radius_scaled() {
        let config = small_config(80, 0.8, 0.3);
        let r = Reservoir::from_config(10, &config);
        let w = dense(&r.w_res);
        let mut rng = StdRng::seed_from_u64(7);
        let rho = power_iteration(80, |v| w.dot(v), &mut rng);
        assert!(
            (rho - config.spectral_radius).abs() / config.spectral_radius < 0.25,
            "rho={rho}"
        );
    }

    #[test]
    fn test_sparsity() {
        let r = Reservoir::from_config(10, &small_config(200, 0.9, 0.3));
        let density = r.w_res.nnz() as f64 / (200.0 * 200.0);
        assert!((density - 0.1).abs() < 0.02, "density={density}");
    }

    #[test]
    fn test_regenerated_from_seed() {
        let config = small_config(40, 0.9, 0.3);
        let a = Reservoir::from_config(12, &config);
        let b = Reservoir::from_config(12, &config);
        assert_eq!(a.w_in, b.w_in);
        assert_eq!(dense(&a.w_res), dense(&b.w_res));

        let c = Reservoir::from_config(12, &EsnConfig { seed: 43, ..config });
        assert_ne!(a.w_in, c.w_in);
    }

    #[test]
    fn test_zero_leak_keeps_zero_state() {
        let r = Reservoir::from_config(10, &small_config(20, 0.5, 0.0));
        let mut rng = StdRng::seed_from_u64(1);
        let state = r.final_state(&[Array1::ones(10), Array1::ones(10)], &mut rng);
        assert!(state.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_full_leak_single_step() {
        let r = Reservoir::from_config(10, &small_config(20, 0.5, 1.0));
        let mut rng = StdRng::seed_from_u64(1);
        let input = Array1::ones(10);
        let state = r.final_state(std::slice::from_ref(&input), &mut rng);
        let expected = r.w_in.dot(&input).mapv(f64::tanh);
        for i in 0..20 {
            assert!((state[i] - expected[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_final_state_matches_dense_recurrence() {
        let r = Reservoir::from_config(10, &small_config(30, 0.8, 0.4));
        let inputs: Vec<Array1<f64>> = (0..6)
            .map(|i| Array1::from_shape_fn(10, |j| ((i * 10 + j) % 7) as f64 * 0.1))
            .collect();
        let mut rng = StdRng::seed_from_u64(3);
        let got = r.final_state(&inputs, &mut rng);

        let w = dense(&r.w_res);
        let mut h: Array1<f64> = Array1::zeros(30);
        for x in &inputs {
            let pre = r.w_in.dot(x) + w.dot(&h);
            h = &h * 0.6 + &pre.mapv(f64::tanh) * 0.4;
        }
        for i in 0..30 {
            assert!((got[i] - h[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_power_iteration_scaled_identity() {
        let mut rng = StdRng::seed_from_u64(42);
        let rho = power_iteration(5, |v| v * 3.0, &mut rng);
        assert!((rho - 3.0).abs() < 1e-6, "rho={rho}");
        assert_eq!(power_iteration(0, |v| v.clone(), &mut rng), 0.0);
    }
}
