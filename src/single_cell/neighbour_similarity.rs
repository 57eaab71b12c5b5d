use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::time::Instant;
use tracing::{debug, info};

use crate::core::base::cors_similarity::{row_similarity, SimilarityMetric};
use crate::core::base::utils::select_rows;
use crate::core::data::expression::{ClusterAssignment, ExpressionMatrix};
use crate::core::graph::knn::top_k_per_row;
use crate::error::{ImputeError, Result};

/// Cluster label used when all cells are compared with each other
pub const ALL_CELLS_CLUSTER: &str = "all";

////////////////
// Structures //
////////////////

/// NeighbourRecord
///
/// One retained target/source pair.
///
/// ### Fields
///
/// * `cluster` - Cluster in which the pair was found.
/// * `target_cell` - Cell of the dataset to impute for.
/// * `source_cell` - Cell of the dataset to impute from.
/// * `weight` - `similarity + 1`, i.e., in `[0, 2]` for cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighbourRecord {
    pub cluster: String,
    pub target_cell: String,
    pub source_cell: String,
    pub weight: f64,
}

/// NeighbourTable
///
/// Ordered neighbour records plus a lookup per target cell.
///
/// ### Fields
///
/// * `records` - All neighbour records in order of generation.
/// * `by_target` - Target cell -> positions in `records`.
#[derive(Debug, Clone, Default)]
pub struct NeighbourTable {
    records: Vec<NeighbourRecord>,
    by_target: FxHashMap<String, Vec<usize>>,
}

impl NeighbourTable {
    /// Generate the table from records
    pub fn new(records: Vec<NeighbourRecord>) -> Self {
        let mut by_target: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (idx, record) in records.iter().enumerate() {
            by_target
                .entry(record.target_cell.clone())
                .or_default()
                .push(idx);
        }

        Self { records, by_target }
    }

    /// All records
    pub fn records(&self) -> &[NeighbourRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Is the table empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of a given target cell, in table order
    pub fn neighbours_of(&self, target_cell: &str) -> Vec<&NeighbourRecord> {
        self.by_target
            .get(target_cell)
            .map(|idx| idx.iter().map(|&i| &self.records[i]).collect())
            .unwrap_or_default()
    }
}

/// ClusterCells
///
/// The cells that take part in the comparison of one cluster.
///
/// ### Fields
///
/// * `label` - The cluster label.
/// * `target_rows` - Row indices into the target matrix.
/// * `source_rows` - Row indices into the source matrix.
#[derive(Debug, Clone)]
pub struct ClusterCells {
    pub label: String,
    pub target_rows: Vec<usize>,
    pub source_rows: Vec<usize>,
}

/////////////
// Helpers //
/////////////

/// Group the cells of both matrices by cluster
///
/// ### Params
///
/// * `target` - The matrix to impute for.
/// * `source` - The matrix to impute from.
/// * `clusters` - Optional cluster assignment.
/// * `consider_clusters` - Shall the comparison be restricted to cells of the
///   same cluster. If `false` or no assignment is given, one group with all
///   cells under the label `"all"` is returned.
///
/// ### Returns
///
/// One `ClusterCells` per cluster label in order of first appearance. Cells
/// keep their matrix order; cells without a label are left out.
pub fn cluster_cell_groups(
    target: &ExpressionMatrix,
    source: &ExpressionMatrix,
    clusters: Option<&ClusterAssignment>,
    consider_clusters: bool,
) -> Vec<ClusterCells> {
    let clusters = match clusters {
        Some(clusters) if consider_clusters => clusters,
        _ => {
            return vec![ClusterCells {
                label: ALL_CELLS_CLUSTER.to_string(),
                target_rows: (0..target.n_cells()).collect(),
                source_rows: (0..source.n_cells()).collect(),
            }]
        }
    };

    let labels = clusters.cluster_labels();
    let label_pos: FxHashMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| (label.as_str(), i))
        .collect();

    let mut groups: Vec<ClusterCells> = labels
        .iter()
        .map(|label| ClusterCells {
            label: label.clone(),
            target_rows: Vec::new(),
            source_rows: Vec::new(),
        })
        .collect();

    for (row, cell) in target.cells().iter().enumerate() {
        if let Some(label) = clusters.label_of(cell) {
            groups[label_pos[label]].target_rows.push(row);
        }
    }
    for (row, cell) in source.cells().iter().enumerate() {
        if let Some(label) = clusters.label_of(cell) {
            groups[label_pos[label]].source_rows.push(row);
        }
    }

    groups
}

/// Find the top-k neighbours within one cluster
///
/// ### Params
///
/// * `group` - The cells of this cluster.
/// * `target` - Aligned target matrix.
/// * `source` - Aligned source matrix.
/// * `metric` - The similarity metric.
/// * `k` - Number of neighbours per target cell.
///
/// ### Returns
///
/// The neighbour records of this cluster; per target cell in descending
/// similarity order. Empty if either side has no cells.
fn cluster_neighbours(
    group: &ClusterCells,
    target: &ExpressionMatrix,
    source: &ExpressionMatrix,
    metric: SimilarityMetric,
    k: usize,
) -> Vec<NeighbourRecord> {
    if group.target_rows.is_empty() || group.source_rows.is_empty() {
        debug!(
            "Skipping cluster '{}': {} target cells, {} source cells",
            group.label,
            group.target_rows.len(),
            group.source_rows.len()
        );
        return Vec::new();
    }

    let target_sub = select_rows(&target.data(), &group.target_rows);
    let source_sub = select_rows(&source.data(), &group.source_rows);

    let similarities = row_similarity(&target_sub.as_ref(), &source_sub.as_ref(), metric);
    let top_k = top_k_per_row(&similarities.as_ref(), k);

    let mut records = Vec::with_capacity(group.target_rows.len() * k.min(group.source_rows.len()));
    for (i, neighbours) in top_k.into_iter().enumerate() {
        let target_cell = &target.cells()[group.target_rows[i]];
        for (j, similarity) in neighbours {
            records.push(NeighbourRecord {
                cluster: group.label.clone(),
                target_cell: target_cell.clone(),
                source_cell: source.cells()[group.source_rows[j]].clone(),
                weight: (similarity + 1.0).clamp(0.0, 2.0),
            });
        }
    }

    records
}

////////////////////
// Main functions //
////////////////////

/// Generate the neighbour table between target and source cells
///
/// For each cluster the full similarity matrix between its target and source
/// cells is calculated and the `k` most similar source cells per target cell
/// are retained. Equal similarities are ordered by the position of the source
/// cell in the source matrix. Clusters are processed in parallel.
///
/// ### Params
///
/// * `target` - Target matrix, aligned to the source genes.
/// * `source` - Source matrix, aligned to the target genes.
/// * `clusters` - Optional cluster assignment for both datasets.
/// * `metric` - The similarity metric.
/// * `k` - Number of neighbours per target cell. Needs to be `> 0`.
/// * `consider_clusters` - Restrict the search to cells of the same cluster.
/// * `verbose` - Controls verbosity of the function.
///
/// ### Returns
///
/// The `NeighbourTable` with the records of all clusters in cluster order.
pub fn neighbour_table(
    target: &ExpressionMatrix,
    source: &ExpressionMatrix,
    clusters: Option<&ClusterAssignment>,
    metric: SimilarityMetric,
    k: usize,
    consider_clusters: bool,
    verbose: bool,
) -> Result<NeighbourTable> {
    if k == 0 {
        return Err(ImputeError::invalid_parameter(
            "k_neighbours needs to be a positive integer",
        ));
    }
    if target.genes() != source.genes() {
        return Err(ImputeError::invalid_parameter(
            "target and source genes are not aligned",
        ));
    }

    let start = Instant::now();

    let groups = cluster_cell_groups(target, source, clusters, consider_clusters);

    let records: Vec<NeighbourRecord> = groups
        .par_iter()
        .map(|group| cluster_neighbours(group, target, source, metric, k))
        .collect::<Vec<Vec<NeighbourRecord>>>()
        .into_iter()
        .flatten()
        .collect();

    let end = start.elapsed();

    if verbose {
        info!(
            "Generated {} neighbour records across {} clusters ({}): {:.2?}",
            records.len(),
            groups.len(),
            metric,
            end
        );
    }

    Ok(NeighbourTable::new(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::base::cors_similarity::cosine_similarity;
    use crate::core::data::synthetic_data::generate_clustered_expression;
    use crate::single_cell::gene_alignment::align_genes;

    fn strings(x: &[&str]) -> Vec<String> {
        x.iter().map(|s| s.to_string()).collect()
    }

    fn example_data() -> (ExpressionMatrix, ExpressionMatrix, ClusterAssignment) {
        let target =
            ExpressionMatrix::from_rows(strings(&["c1"]), strings(&["g1", "g2"]), &[vec![1.0, 0.0]])
                .unwrap();
        let source = ExpressionMatrix::from_rows(
            strings(&["d1", "d2", "d3"]),
            strings(&["g1", "g2"]),
            &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        )
        .unwrap();
        let clusters = ClusterAssignment::new(
            ["c1", "d1", "d2", "d3"]
                .iter()
                .map(|c| (c.to_string(), "A".to_string()))
                .collect(),
        )
        .unwrap();

        (target, source, clusters)
    }

    #[test]
    fn test_example_top_two() {
        let (target, source, clusters) = example_data();
        let table = neighbour_table(
            &target,
            &source,
            Some(&clusters),
            SimilarityMetric::Cosine,
            2,
            true,
            false,
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        let records = table.records();
        assert_eq!(records[0].cluster, "A");
        assert_eq!(records[0].target_cell, "c1");
        assert_eq!(records[0].source_cell, "d1");
        assert!((records[0].weight - 2.0).abs() < 1e-12);
        assert_eq!(records[1].source_cell, "d3");
        assert!((records[1].weight - (1.0 + std::f64::consts::FRAC_1_SQRT_2)).abs() < 1e-12);
    }

    #[test]
    fn test_fewer_candidates_than_k() {
        let (target, source, clusters) = example_data();
        let table = neighbour_table(
            &target,
            &source,
            Some(&clusters),
            SimilarityMetric::Cosine,
            25,
            true,
            false,
        )
        .unwrap();

        let sources: Vec<&str> = table
            .neighbours_of("c1")
            .iter()
            .map(|r| r.source_cell.as_str())
            .collect();
        assert_eq!(sources, vec!["d1", "d3", "d2"]);
    }

    #[test]
    fn test_zero_k_is_rejected() {
        let (target, source, clusters) = example_data();
        let res = neighbour_table(
            &target,
            &source,
            Some(&clusters),
            SimilarityMetric::Cosine,
            0,
            true,
            false,
        );
        assert!(matches!(res, Err(ImputeError::InvalidParameter { .. })));
    }

    #[test]
    fn test_cluster_restriction_and_skipping() {
        let target = ExpressionMatrix::from_rows(
            strings(&["c1", "c2", "c3"]),
            strings(&["g1", "g2"]),
            &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        )
        .unwrap();
        let source = ExpressionMatrix::from_rows(
            strings(&["d1", "d2", "d3"]),
            strings(&["g1", "g2"]),
            &[vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 2.0]],
        )
        .unwrap();
        // c3 has no label; cluster C has no source cells
        let clusters = ClusterAssignment::new(vec![
            ("c1".to_string(), "A".to_string()),
            ("c2".to_string(), "C".to_string()),
            ("d1".to_string(), "B".to_string()),
            ("d2".to_string(), "A".to_string()),
            ("d3".to_string(), "A".to_string()),
        ])
        .unwrap();

        let groups = cluster_cell_groups(&target, &source, Some(&clusters), true);
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "C", "B"]);

        let table = neighbour_table(
            &target,
            &source,
            Some(&clusters),
            SimilarityMetric::Cosine,
            5,
            true,
            false,
        )
        .unwrap();

        // only c1 is compared, and only against d2 and d3 (cluster A)
        assert_eq!(table.len(), 2);
        assert!(table.neighbours_of("c2").is_empty());
        assert!(table.neighbours_of("c3").is_empty());
        let sources: Vec<&str> = table
            .neighbours_of("c1")
            .iter()
            .map(|r| r.source_cell.as_str())
            .collect();
        assert_eq!(sources, vec!["d3", "d2"]);

        // without clusters every cell sees every source cell once
        let table = neighbour_table(
            &target,
            &source,
            Some(&clusters),
            SimilarityMetric::Cosine,
            5,
            false,
            false,
        )
        .unwrap();
        assert_eq!(table.len(), 9);
        assert!(table.records().iter().all(|r| r.cluster == ALL_CELLS_CLUSTER));
        assert_eq!(table.neighbours_of("c1")[0].source_cell, "d1");
    }

    #[test]
    fn test_ties_follow_source_order() {
        let target =
            ExpressionMatrix::from_rows(strings(&["c1"]), strings(&["g1", "g2"]), &[vec![1.0, 1.0]])
                .unwrap();
        let source = ExpressionMatrix::from_rows(
            strings(&["d1", "d2", "d3", "d4"]),
            strings(&["g1", "g2"]),
            &[vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        )
        .unwrap();

        let table =
            neighbour_table(&target, &source, None, SimilarityMetric::Cosine, 3, true, false)
                .unwrap();
        let sources: Vec<&str> = table
            .records()
            .iter()
            .map(|r| r.source_cell.as_str())
            .collect();
        // d2 and d4 are identical; d1 and d3 tie as well
        assert_eq!(sources, vec!["d2", "d4", "d1"]);
    }

    #[test]
    fn test_top_k_and_weight_range_on_synthetic_data() {
        let data = generate_clustered_expression(30, 60, 40, 25, 3, 42).unwrap();
        let aligned = align_genes(&data.target, &data.source).unwrap();
        let k = 7;

        let table = neighbour_table(
            &aligned.target,
            &aligned.source,
            Some(&data.clusters),
            SimilarityMetric::Cosine,
            k,
            true,
            false,
        )
        .unwrap();

        assert!(table
            .records()
            .iter()
            .all(|r| (0.0..=2.0).contains(&r.weight)));

        for (t_row, cell) in aligned.target.cells().iter().enumerate() {
            let label = data.clusters.label_of(cell).unwrap();
            let target_vec = aligned.target.row_values(t_row);

            let mut candidates: Vec<f64> = aligned
                .source
                .cells()
                .iter()
                .enumerate()
                .filter(|(_, c)| data.clusters.label_of(c) == Some(label))
                .map(|(s_row, _)| {
                    cosine_similarity(&target_vec, &aligned.source.row_values(s_row)) + 1.0
                })
                .collect();
            candidates.sort_by(|a, b| b.total_cmp(a));
            candidates.truncate(k);

            let emitted: Vec<f64> = table.neighbours_of(cell).iter().map(|r| r.weight).collect();
            assert_eq!(emitted.len(), candidates.len());
            for (e, c) in emitted.iter().zip(&candidates) {
                assert!((e - c).abs() < 1e-9, "cell {}: {} vs {}", cell, e, c);
            }
            assert!(table.neighbours_of(cell).iter().all(|r| r.cluster == label));
        }
    }

    #[test]
    fn test_deterministic() {
        let data = generate_clustered_expression(20, 40, 30, 20, 2, 7).unwrap();
        let aligned = align_genes(&data.target, &data.source).unwrap();

        let run = || {
            neighbour_table(
                &aligned.target,
                &aligned.source,
                Some(&data.clusters),
                SimilarityMetric::Cosine,
                5,
                true,
                false,
            )
            .unwrap()
        };

        let first = run();
        let second = run();
        assert_eq!(first.records(), second.records());
        for (a, b) in first.records().iter().zip(second.records()) {
            assert_eq!(a.weight.to_bits(), b.weight.to_bits());
        }
    }
}
