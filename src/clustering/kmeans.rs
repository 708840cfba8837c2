//! Lloyd's k-means over L2-normalized rows
//!
//! Seeding is deterministic farthest-point traversal from row 0, so the same
//! matrix always produces the same partition. Centroids are renormalized
//! after every update and distances are Euclidean on the unit sphere.

use crate::error::{AstroError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub k: usize,
    pub max_iterations: usize,
    /// Stop once no centroid moves farther than this
    pub convergence_threshold: f32,
}

impl KMeansConfig {
    pub fn new(k: usize, max_iterations: usize, convergence_threshold: f32) -> Result<Self> {
        if k == 0 {
            return Err(AstroError::input("k must be greater than 0"));
        }
        if max_iterations == 0 {
            return Err(AstroError::input("max_iterations must be greater than 0"));
        }
        if !convergence_threshold.is_finite() || convergence_threshold <= 0.0 {
            return Err(AstroError::input(
                "convergence_threshold must be a finite positive number",
            ));
        }
        Ok(Self {
            k,
            max_iterations,
            convergence_threshold,
        })
    }
}

#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Cluster index per row
    pub labels: Vec<usize>,
    /// Euclidean distance of each row to its centroid
    pub distances: Vec<f32>,
    pub centroids: Array2<f32>,
    pub iterations: usize,
    pub converged: bool,
    /// Within-cluster sum of squared distances
    pub inertia: f64,
}

impl KMeansResult {
    /// Row closest to each centroid; ties go to the lower row
    pub fn exemplars(&self) -> Vec<usize> {
        let k = self.centroids.nrows();
        let mut best: Vec<Option<usize>> = vec![None; k];
        for (row, (&label, &dist)) in self.labels.iter().zip(&self.distances).enumerate() {
            match best[label] {
                Some(current) if self.distances[current] <= dist => {}
                _ => best[label] = Some(row),
            }
        }
        best.into_iter().flatten().collect()
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.nrows()];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }
}

/// Partition the rows of `data` into `config.k` clusters
///
/// `config.k` must not exceed the row count. `check` runs before every
/// iteration; its error aborts the run.
pub fn kmeans<F>(
    data: ArrayView2<'_, f32>,
    config: &KMeansConfig,
    mut check: F,
) -> Result<KMeansResult>
where
    F: FnMut() -> Result<()>,
{
    let n = data.nrows();
    let k = config.k;
    if n == 0 || k == 0 || k > n {
        return Err(AstroError::input(format!(
            "cannot form {} clusters from {} points",
            k, n
        )));
    }

    let mut centroids = seed(data, k);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        check()?;
        iterations += 1;

        let (mut labels, sq_dists) = assign(data, &centroids);
        repair_empty(data, &mut centroids, &mut labels, &sq_dists);
        let updated = update(data, &labels, &centroids);

        let movement = (&updated - &centroids)
            .rows()
            .into_iter()
            .map(|row| row.dot(&row).sqrt())
            .fold(0.0f32, f32::max);
        centroids = updated;

        if movement < config.convergence_threshold {
            converged = true;
            break;
        }
    }

    let (mut labels, sq_dists) = assign(data, &centroids);
    repair_empty(data, &mut centroids, &mut labels, &sq_dists);
    let distances: Vec<f32> = labels
        .iter()
        .enumerate()
        .map(|(i, &c)| squared_distance(data.row(i), centroids.row(c)).sqrt())
        .collect();
    let inertia = distances.iter().map(|&d| (d as f64) * (d as f64)).sum();

    debug!(
        "k-means: k={}, n={}, {} iterations, converged={}, inertia={:.4}",
        k, n, iterations, converged, inertia
    );

    Ok(KMeansResult {
        labels,
        distances,
        centroids,
        iterations,
        converged,
        inertia,
    })
}

fn squared_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Farthest-point seeding starting from row 0
fn seed(data: ArrayView2<'_, f32>, k: usize) -> Array2<f32> {
    let n = data.nrows();
    let mut chosen = vec![0usize];
    let mut min_dist: Vec<f32> = (0..n)
        .map(|i| squared_distance(data.row(i), data.row(0)))
        .collect();

    while chosen.len() < k {
        let mut next: Option<usize> = None;
        for i in 0..n {
            if chosen.contains(&i) {
                continue;
            }
            match next {
                Some(best) if min_dist[best] >= min_dist[i] => {}
                _ => next = Some(i),
            }
        }
        // k <= n, so an unchosen row always exists
        let Some(next) = next else { break };
        chosen.push(next);
        for (i, d) in min_dist.iter_mut().enumerate() {
            *d = d.min(squared_distance(data.row(i), data.row(next)));
        }
    }

    let mut centroids = Array2::zeros((k, data.ncols()));
    for (c, &row) in chosen.iter().enumerate() {
        centroids.row_mut(c).assign(&data.row(row));
    }
    centroids
}

/// Nearest centroid per row (ties to the lower cluster) and its squared distance
fn assign(data: ArrayView2<'_, f32>, centroids: &Array2<f32>) -> (Vec<usize>, Vec<f32>) {
    let mut labels = Vec::with_capacity(data.nrows());
    let mut dists = Vec::with_capacity(data.nrows());
    for row in data.rows() {
        let mut best = (0usize, f32::INFINITY);
        for (c, centroid) in centroids.rows().into_iter().enumerate() {
            let d = squared_distance(row, centroid);
            if d < best.1 {
                best = (c, d);
            }
        }
        labels.push(best.0);
        dists.push(best.1);
    }
    (labels, dists)
}

/// Give every empty cluster the row farthest from its own centroid
///
/// Only rows from clusters with more than one member are moved, so a
/// repair never empties another cluster.
fn repair_empty(
    data: ArrayView2<'_, f32>,
    centroids: &mut Array2<f32>,
    labels: &mut [usize],
    sq_dists: &[f32],
) {
    let k = centroids.nrows();
    let mut sizes = vec![0usize; k];
    for &label in labels.iter() {
        sizes[label] += 1;
    }
    let mut moved = vec![false; labels.len()];

    for cluster in 0..k {
        if sizes[cluster] > 0 {
            continue;
        }
        let mut donor: Option<usize> = None;
        for i in 0..labels.len() {
            if moved[i] || sizes[labels[i]] < 2 {
                continue;
            }
            match donor {
                Some(best) if sq_dists[best] >= sq_dists[i] => {}
                _ => donor = Some(i),
            }
        }
        if let Some(i) = donor {
            debug!("Re-seeding empty cluster {} with row {}", cluster, i);
            sizes[labels[i]] -= 1;
            sizes[cluster] = 1;
            labels[i] = cluster;
            moved[i] = true;
            centroids.row_mut(cluster).assign(&data.row(i));
        }
    }
}

/// Renormalized member means; a cluster whose mean vanishes keeps its centroid
fn update(data: ArrayView2<'_, f32>, labels: &[usize], centroids: &Array2<f32>) -> Array2<f32> {
    let k = centroids.nrows();
    let mut sums = Array2::<f32>::zeros(centroids.raw_dim());
    for (i, &label) in labels.iter().enumerate() {
        let mut row = sums.row_mut(label);
        row += &data.row(i);
    }

    for (c, mut row) in sums.axis_iter_mut(Axis(0)).enumerate() {
        let norm = row.dot(&row).sqrt();
        if norm > f32::EPSILON && norm.is_finite() {
            row /= norm;
        } else {
            row.assign(&centroids.row(c));
        }
    }
    debug_assert_eq!(sums.nrows(), k);
    sums
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: &[f32]) -> Vec<f32> {
        let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / n).collect()
    }

    fn matrix(rows: &[Vec<f32>]) -> Array2<f32> {
        let dim = rows[0].len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| unit(r)).collect();
        Array2::from_shape_vec((rows.len(), dim), flat).unwrap()
    }

    fn never() -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_two_obvious_groups() {
        let data = matrix(&[
            vec![1.0, 0.1, 0.0],
            vec![0.0, 0.1, 1.0],
            vec![1.0, 0.0, 0.1],
            vec![0.1, 0.0, 1.0],
        ]);
        let config = KMeansConfig::new(2, 100, 1e-6).unwrap();
        let result = kmeans(data.view(), &config, never).unwrap();

        assert_eq!(result.labels[0], result.labels[2]);
        assert_eq!(result.labels[1], result.labels[3]);
        assert_ne!(result.labels[0], result.labels[1]);
        assert!(result.converged);
        assert_eq!(result.cluster_sizes(), vec![2, 2]);
    }

    #[test]
    fn test_k_one_puts_everything_together() {
        let data = matrix(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]]);
        let config = KMeansConfig::new(1, 50, 1e-6).unwrap();
        let result = kmeans(data.view(), &config, never).unwrap();
        assert_eq!(result.labels, vec![0, 0, 0]);
        assert_eq!(result.exemplars(), vec![2]);
    }

    #[test]
    fn test_k_equals_n_gives_singletons() {
        let data = matrix(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]]);
        let config = KMeansConfig::new(3, 50, 1e-6).unwrap();
        let result = kmeans(data.view(), &config, never).unwrap();

        let mut labels = result.labels.clone();
        labels.sort();
        assert_eq!(labels, vec![0, 1, 2]);
        assert!(result.distances.iter().all(|&d| d < 1e-5));
        assert!(result.inertia < 1e-9);
    }

    #[test]
    fn test_duplicate_points_still_fill_every_cluster() {
        let data = matrix(&[vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]]);
        let config = KMeansConfig::new(3, 10, 1e-6).unwrap();
        let result = kmeans(data.view(), &config, never).unwrap();
        assert_eq!(result.cluster_sizes(), vec![1, 1, 1]);
    }

    #[test]
    fn test_deterministic() {
        let data = matrix(&[
            vec![1.0, 0.2, 0.1],
            vec![0.3, 1.0, 0.0],
            vec![0.1, 0.2, 1.0],
            vec![0.9, 0.3, 0.0],
            vec![0.2, 0.9, 0.2],
        ]);
        let config = KMeansConfig::new(2, 100, 1e-6).unwrap();
        let a = kmeans(data.view(), &config, never).unwrap();
        let b = kmeans(data.view(), &config, never).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.distances, b.distances);
    }

    #[test]
    fn test_check_aborts_run() {
        let data = matrix(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        let config = KMeansConfig::new(2, 10, 1e-6).unwrap();
        let result = kmeans(data.view(), &config, || Err(AstroError::Cancelled));
        assert!(matches!(result, Err(AstroError::Cancelled)));
    }

    #[test]
    fn test_invalid_config() {
        assert!(KMeansConfig::new(0, 10, 1e-6).is_err());
        assert!(KMeansConfig::new(2, 0, 1e-6).is_err());
        assert!(KMeansConfig::new(2, 10, f32::NAN).is_err());

        let data = matrix(&[vec![1.0, 0.0]]);
        let config = KMeansConfig::new(2, 10, 1e-6).unwrap();
        assert!(kmeans(data.view(), &config, never).is_err());
    }
}
