use rand::prelude::*;
use rand_distr::{Distribution, Gamma, Poisson};
use rayon::prelude::*;

use crate::core::data::expression::{ClusterAssignment, ExpressionMatrix};
use crate::error::{ImputeError, Result};

////////////////
// Structures //
////////////////

/// Structure for synthetic imputation data
///
/// ### Fields
///
/// * `target` - Target cells (e.g. spatial spots) that only measure a subset
///   of the genes.
/// * `source` - Source cells (e.g. single cells) with all genes.
/// * `clusters` - Cluster label of every target and source cell.
#[derive(Clone, Debug)]
pub struct SyntheticImputationData {
    pub target: ExpressionMatrix,
    pub source: ExpressionMatrix,
    pub clusters: ClusterAssignment,
}

/////////////
// Helpers //
/////////////

fn dist_error(err: impl std::fmt::Display) -> ImputeError {
    ImputeError::invalid_parameter(format!("could not set up distribution: {}", err))
}

/// Sample counts for a set of cells
///
/// ### Params
///
/// * `n_cells` - Number of cells to sample.
/// * `cluster_means` - Mean expression per cluster; `n_clusters x n_genes`.
/// * `seed` - Seed of the first cell; cell `i` uses `seed + i`.
///
/// ### Returns
///
/// One count vector per cell. Cell `i` belongs to cluster
/// `i % n_clusters`.
fn sample_cells(n_cells: usize, cluster_means: &[Vec<f64>], seed: u64) -> Result<Vec<Vec<f64>>> {
    let n_clusters = cluster_means.len();
    let size_factor = Gamma::new(10.0, 0.1).map_err(dist_error)?;

    (0..n_cells)
        .into_par_iter()
        .map(|i| {
            let mut local_rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            let size = size_factor.sample(&mut local_rng);

            cluster_means[i % n_clusters]
                .iter()
                .map(|&mean| {
                    let poisson = Poisson::new(mean * size + 1e-3).map_err(dist_error)?;
                    Ok(poisson.sample(&mut local_rng))
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect()
}

/////////////////////
// Synthetic cells //
/////////////////////

/// Generate clustered synthetic data for imputation
///
/// Every cluster has its own marker genes (gene `j` is a marker of cluster
/// `j % n_clusters`) with a four-fold increased mean. Target and source cells
/// are assigned round robin to the clusters.
///
/// ### Params
///
/// * `n_target` - Number of target cells (`spot_{i}`).
/// * `n_source` - Number of source cells (`cell_{i}`).
/// * `n_genes` - Number of genes in the source data (`gene_{j}`).
/// * `n_target_genes` - The target data measures the first `n_target_genes`
///   genes only. Needs to be `1..=n_genes`.
/// * `n_clusters` - Number of clusters. Needs to be `> 0`.
/// * `seed` - Seed for reproducibility purposes.
///
/// ### Returns
///
/// The `SyntheticImputationData`.
pub fn generate_clustered_expression(
    n_target: usize,
    n_source: usize,
    n_genes: usize,
    n_target_genes: usize,
    n_clusters: usize,
    seed: u64,
) -> Result<SyntheticImputationData> {
    if n_clusters == 0 {
        return Err(ImputeError::invalid_parameter(
            "n_clusters needs to be a positive integer",
        ));
    }
    if n_target_genes == 0 || n_target_genes > n_genes {
        return Err(ImputeError::invalid_parameter(format!(
            "n_target_genes needs to be between 1 and {}, got {}",
            n_genes, n_target_genes
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);

    // gene level means shared by all clusters
    let gamma = Gamma::new(2.0, 2.0).map_err(dist_error)?;
    let base_means: Vec<f64> = (0..n_genes).map(|_| gamma.sample(&mut rng)).collect();

    let cluster_means: Vec<Vec<f64>> = (0..n_clusters)
        .map(|c| {
            base_means
                .iter()
                .enumerate()
                .map(|(j, &mean)| if j % n_clusters == c { mean * 4.0 } else { mean })
                .collect()
        })
        .collect();

    let source_rows = sample_cells(n_source, &cluster_means, seed.wrapping_add(1))?;
    let target_rows: Vec<Vec<f64>> = sample_cells(
        n_target,
        &cluster_means,
        seed.wrapping_add(1).wrapping_add(n_source as u64),
    )?
    .into_iter()
    .map(|row| row[..n_target_genes].to_vec())
    .collect();

    let genes: Vec<String> = (0..n_genes).map(|j| format!("gene_{}", j)).collect();
    let target_cells: Vec<String> = (0..n_target).map(|i| format!("spot_{}", i)).collect();
    let source_cells: Vec<String> = (0..n_source).map(|i| format!("cell_{}", i)).collect();

    let pairs: Vec<(String, String)> = target_cells
        .iter()
        .enumerate()
        .chain(source_cells.iter().enumerate())
        .map(|(i, cell)| (cell.clone(), format!("cluster_{}", i % n_clusters)))
        .collect();

    let target = ExpressionMatrix::from_rows(
        target_cells,
        genes[..n_target_genes].to_vec(),
        &target_rows,
    )?;
    let source = ExpressionMatrix::from_rows(source_cells, genes, &source_rows)?;
    let clusters = ClusterAssignment::new(pairs)?;

    Ok(SyntheticImputationData {
        target,
        source,
        clusters,
    })
}
