use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use crate::core::data::expression::{ClusterSource, ExpressionMatrix, MatrixSource};
use crate::core::data::tsv_io::write_neighbour_table;
use crate::error::Result;
use crate::single_cell::chunk_merge::merge_chunk_dir;
use crate::single_cell::gene_alignment::align_genes;
use crate::single_cell::imputation::{impute_expression_to_dir, CHUNK_DIR};
use crate::single_cell::neighbour_similarity::{neighbour_table, NeighbourTable};
use crate::single_cell::params::{ImputationParams, RunControl};
use crate::single_cell::quality::{validate_results, QualityReport};

/// File name of the neighbour table
pub const NEIGHBOUR_FILE: &str = "sim_matrix.tsv";

/// ImputationResult
///
/// ### Fields
///
/// * `neighbours` - The neighbour table (also written as `sim_matrix.tsv`).
/// * `imputed` - Imputed matrix; target cells x source genes.
/// * `quality` - Agreement of imputed and measured values on the shared
///   genes.
/// * `outdir` - Directory with all written artifacts.
#[derive(Debug, Clone)]
pub struct ImputationResult {
    pub neighbours: NeighbourTable,
    pub imputed: ExpressionMatrix,
    pub quality: QualityReport,
    pub outdir: PathBuf,
}

/// Run the full imputation workflow
///
/// Gene alignment, neighbour search, chunked imputation, merging and the
/// quality report. All artifacts are written to `params.outdir`. Every
/// target cell is imputed; a cell without neighbours (no cluster label or
/// no source cell in its cluster) fails the run with `NoNeighbours`.
///
/// ### Params
///
/// * `target` - The matrix to impute for (e.g. spatial spots).
/// * `source` - The matrix to impute from (e.g. single cells).
/// * `clusters` - Optional cluster assignment of target and source cells.
/// * `params` - The `ImputationParams`.
/// * `control` - Deadline and cancellation of the run.
///
/// ### Returns
///
/// The `ImputationResult`.
pub fn expression_imputation(
    target: MatrixSource,
    source: MatrixSource,
    clusters: Option<ClusterSource>,
    params: &ImputationParams,
    control: &RunControl,
) -> Result<ImputationResult> {
    let metric = params.validate()?;
    let verbose = params.verbose;
    let start_total = Instant::now();

    let start = Instant::now();
    let target = target.resolve()?;
    let source = source.resolve()?;
    let clusters = clusters
        .map(|c| c.resolve(params.cell_name_column_idx))
        .transpose()?;

    if verbose {
        info!(
            "Loaded {} target cells x {} genes and {} source cells x {} genes: {:.2?}",
            target.n_cells(),
            target.n_genes(),
            source.n_cells(),
            source.n_genes(),
            start.elapsed()
        );
    }
    control.check_deadline("loading of the inputs")?;

    fs::create_dir_all(&params.outdir)?;

    let aligned = align_genes(&target, &source)?;
    if verbose {
        info!("Found {} shared genes", aligned.target.n_genes());
    }
    control.check_deadline("gene alignment")?;

    let neighbours = neighbour_table(
        &aligned.target,
        &aligned.source,
        clusters.as_ref(),
        metric,
        params.k_neighbours,
        params.consider_clusters,
        verbose,
    )?;
    write_neighbour_table(&params.outdir.join(NEIGHBOUR_FILE), &neighbours)?;
    control.check_deadline("similarity search")?;

    let chunk_dir = params.outdir.join(CHUNK_DIR);

    impute_expression_to_dir(
        target.cells(),
        &source,
        &neighbours,
        params.chunk_size,
        &chunk_dir,
        control,
        verbose,
    )?;
    control.check_deadline("imputation")?;

    let imputed = merge_chunk_dir(&chunk_dir, &params.outdir, params.keep_artifacts, verbose)?;

    let quality = validate_results(&target, &imputed)?;
    quality.write_to(&params.outdir)?;

    if verbose {
        info!(
            "Imputation finished with a median similarity of {:.3}: {:.2?}",
            quality.summary.median,
            start_total.elapsed()
        );
    }

    Ok(ImputationResult {
        neighbours,
        imputed,
        quality,
        outdir: params.outdir.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::expression::ClusterAssignment;
    use crate::core::data::synthetic_data::generate_clustered_expression;
    use crate::core::data::tsv_io::{read_imputed_matrix, read_neighbour_table, write_expression_matrix};
    use crate::error::ImputeError;
    use crate::single_cell::chunk_merge::IMPUTATION_FILE;
    use crate::single_cell::quality::{SCORES_FILE, STATS_FILE};
    use std::time::Duration;
    use tempfile::TempDir;

    fn params(outdir: PathBuf) -> ImputationParams {
        ImputationParams {
            k_neighbours: 5,
            chunk_size: 4,
            outdir,
            ..Default::default()
        }
    }

    #[test]
    fn test_pipeline_from_files() {
        let dir = TempDir::new().unwrap();
        let data = generate_clustered_expression(10, 24, 16, 8, 2, 42).unwrap();

        let target_path = dir.path().join("target.tsv");
        let source_path = dir.path().join("source.tsv");
        let cluster_path = dir.path().join("clusters.tsv");
        write_expression_matrix(&target_path, &data.target).unwrap();
        write_expression_matrix(&source_path, &data.source).unwrap();

        let mut cluster_table = String::from("cell\tcluster\n");
        for cell in data.target.cells().iter().chain(data.source.cells()) {
            let label = data.clusters.label_of(cell).unwrap();
            cluster_table.push_str(&format!("{}\t{}\n", cell, label));
        }
        fs::write(&cluster_path, cluster_table).unwrap();

        let outdir = dir.path().join("out");
        let res = expression_imputation(
            target_path.as_path().into(),
            source_path.into(),
            Some(cluster_path.into()),
            &params(outdir.clone()),
            &RunControl::new(),
        )
        .unwrap();

        assert_eq!(res.imputed.n_cells(), 10);
        assert_eq!(res.imputed.genes(), data.source.genes());
        assert_eq!(res.imputed.cells(), data.target.cells());
        assert_eq!(res.neighbours.len(), 10 * 5);
        assert_eq!(res.quality.scores.len(), 10);

        for name in [NEIGHBOUR_FILE, IMPUTATION_FILE, STATS_FILE, SCORES_FILE] {
            assert!(outdir.join(name).is_file(), "{} missing", name);
        }
        assert!(outdir.join(CHUNK_DIR).join("imputation_chunk_00002.json").is_file());

        let table = read_neighbour_table(&outdir.join(NEIGHBOUR_FILE)).unwrap();
        assert_eq!(table.records(), res.neighbours.records());
        for record in table.records() {
            assert!((0.0..=2.0).contains(&record.weight));
            assert_eq!(
                data.clusters.label_of(&record.target_cell),
                data.clusters.label_of(&record.source_cell)
            );
        }

        let written = read_imputed_matrix(&outdir.join(IMPUTATION_FILE)).unwrap();
        for i in 0..written.n_cells() {
            assert_eq!(written.row_values(i), res.imputed.row_values(i));
        }
    }

    #[test]
    fn test_pipeline_in_memory_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let data = generate_clustered_expression(9, 20, 12, 6, 3, 3).unwrap();

        let mut first = params(dir.path().join("a"));
        first.keep_artifacts = false;
        let mut second = params(dir.path().join("b"));
        second.chunk_size = 100;
        second.consider_clusters = true;

        let a = expression_imputation(
            data.target.clone().into(),
            data.source.clone().into(),
            Some(data.clusters.clone().into()),
            &first,
            &RunControl::new(),
        )
        .unwrap();
        let b = expression_imputation(
            data.target.clone().into(),
            data.source.clone().into(),
            Some(data.clusters.clone().into()),
            &second,
            &RunControl::new(),
        )
        .unwrap();

        assert_eq!(a.neighbours.records(), b.neighbours.records());
        for i in 0..a.imputed.n_cells() {
            assert_eq!(a.imputed.row_values(i), b.imputed.row_values(i));
        }
        assert!(!dir.path().join("a").join(CHUNK_DIR).exists());
        assert!(dir.path().join("b").join(CHUNK_DIR).exists());
    }

    #[test]
    fn test_pipeline_without_clusters() {
        let dir = TempDir::new().unwrap();
        let data = generate_clustered_expression(6, 10, 8, 4, 2, 9).unwrap();

        let mut p = params(dir.path().to_path_buf());
        p.consider_clusters = false;

        let res = expression_imputation(
            data.target.into(),
            data.source.into(),
            None,
            &p,
            &RunControl::new(),
        )
        .unwrap();

        assert_eq!(res.imputed.n_cells(), 6);
        assert!(res.neighbours.records().iter().all(|r| r.cluster == "all"));
    }

    #[test]
    fn test_pipeline_unlabelled_target_cell_fails() {
        let dir = TempDir::new().unwrap();
        let data = generate_clustered_expression(4, 8, 8, 4, 2, 5).unwrap();
        let unlabelled = data.target.cells()[1].clone();

        let pairs: Vec<(String, String)> = data
            .target
            .cells()
            .iter()
            .chain(data.source.cells())
            .filter(|cell| **cell != unlabelled)
            .map(|cell| (cell.clone(), data.clusters.label_of(cell).unwrap().to_string()))
            .collect();
        let clusters = ClusterAssignment::new(pairs).unwrap();

        let outdir = dir.path().join("out");
        let res = expression_imputation(
            data.target.into(),
            data.source.into(),
            Some(clusters.into()),
            &params(outdir.clone()),
            &RunControl::new(),
        );
        match res {
            Err(ImputeError::NoNeighbours { cell }) => assert_eq!(cell, unlabelled),
            other => panic!("expected NoNeighbours, got {:?}", other.map(|r| r.imputed.n_cells())),
        }
        assert!(!outdir.join(IMPUTATION_FILE).exists());
    }

    #[test]
    fn test_pipeline_rerun_in_same_outdir() {
        let dir = TempDir::new().unwrap();
        let data = generate_clustered_expression(10, 24, 16, 8, 2, 7).unwrap();
        let outdir = dir.path().join("out");

        // 10 cells in chunks of 4 leave three chunks behind
        let first = expression_imputation(
            data.target.clone().into(),
            data.source.clone().into(),
            Some(data.clusters.clone().into()),
            &params(outdir.clone()),
            &RunControl::new(),
        )
        .unwrap();
        assert_eq!(first.imputed.n_cells(), 10);

        let rows: Vec<Vec<f64>> = (0..5).map(|i| data.target.row_values(i)).collect();
        let smaller = ExpressionMatrix::from_rows(
            data.target.cells()[..5].to_vec(),
            data.target.genes().to_vec(),
            &rows,
        )
        .unwrap();

        let second = expression_imputation(
            smaller.clone().into(),
            data.source.clone().into(),
            Some(data.clusters.clone().into()),
            &params(outdir.clone()),
            &RunControl::new(),
        )
        .unwrap();

        assert_eq!(second.imputed.cells(), smaller.cells());
        assert!(!outdir.join(CHUNK_DIR).join("imputation_chunk_00002.json").exists());

        let written = read_imputed_matrix(&outdir.join(IMPUTATION_FILE)).unwrap();
        assert_eq!(written.n_cells(), 5);
        for i in 0..5 {
            assert_eq!(second.imputed.row_values(i), first.imputed.row_values(i));
        }
    }

    #[test]
    fn test_pipeline_failures() {
        let dir = TempDir::new().unwrap();
        let data = generate_clustered_expression(4, 6, 6, 3, 1, 1).unwrap();

        let mut p = params(dir.path().join("bad_metric"));
        p.metric = "manhattan".to_string();
        let res = expression_imputation(
            data.target.clone().into(),
            data.source.clone().into(),
            None,
            &p,
            &RunControl::new(),
        );
        assert!(matches!(res, Err(ImputeError::InvalidMetric { .. })));
        assert!(!dir.path().join("bad_metric").exists());

        let res = expression_imputation(
            dir.path().join("missing.tsv").into(),
            data.source.clone().into(),
            None,
            &params(dir.path().join("missing")),
            &RunControl::new(),
        );
        assert!(matches!(res, Err(ImputeError::InputNotFound { .. })));

        let other = ExpressionMatrix::from_rows(
            vec!["x".to_string()],
            vec!["unrelated".to_string()],
            &[vec![1.0]],
        )
        .unwrap();
        let res = expression_imputation(
            other.into(),
            data.source.clone().into(),
            None,
            &params(dir.path().join("disjoint")),
            &RunControl::new(),
        );
        assert!(matches!(res, Err(ImputeError::EmptyIntersection { .. })));

        let control = RunControl::new().with_timeout(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        let res = expression_imputation(
            data.target.into(),
            data.source.into(),
            None,
            &params(dir.path().join("deadline")),
            &control,
        );
        assert!(matches!(res, Err(ImputeError::DeadlineExceeded { .. })));
    }
}
