use faer::{Mat, MatRef};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

use crate::core::base::utils::select_cols;
use crate::core::data::tsv_io::{read_cluster_assignment, read_expression_matrix};
use crate::error::{ImputeError, Result};
use crate::utils::general::{position_map, unique_ordered};

////////////////
// Structures //
////////////////

/// ExpressionMatrix
///
/// Dense cell-by-gene expression matrix with named rows and columns.
///
/// ### Fields
///
/// * `cells` - Cell identifiers (rows), unique and in order of appearance.
/// * `genes` - Gene identifiers (columns), unique.
/// * `data` - The expression values with rows = cells and columns = genes.
/// * `cell_index` - Lookup of cell identifier to row index.
/// * `gene_index` - Lookup of gene identifier to column index.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    cells: Vec<String>,
    genes: Vec<String>,
    data: Mat<f64>,
    cell_index: FxHashMap<String, usize>,
    gene_index: FxHashMap<String, usize>,
}

impl ExpressionMatrix {
    /// Generate a new expression matrix
    ///
    /// ### Params
    ///
    /// * `cells` - Cell identifiers; one per row of `data`.
    /// * `genes` - Gene identifiers; one per column of `data`.
    /// * `data` - Cell-by-gene matrix.
    ///
    /// ### Returns
    ///
    /// The `ExpressionMatrix` or an error if the dimensions do not fit or an
    /// identifier occurs twice.
    pub fn new(cells: Vec<String>, genes: Vec<String>, data: Mat<f64>) -> Result<Self> {
        if data.nrows() != cells.len() || data.ncols() != genes.len() {
            return Err(ImputeError::invalid_parameter(format!(
                "matrix of shape {}x{} does not fit {} cells and {} genes",
                data.nrows(),
                data.ncols(),
                cells.len(),
                genes.len()
            )));
        }

        let cell_index = position_map(&cells).map_err(|cell| {
            ImputeError::invalid_parameter(format!("cell identifier '{}' is not unique", cell))
        })?;
        let gene_index = position_map(&genes).map_err(|gene| {
            ImputeError::invalid_parameter(format!("gene identifier '{}' is not unique", gene))
        })?;

        Ok(Self {
            cells,
            genes,
            data,
            cell_index,
            gene_index,
        })
    }

    /// Generate the matrix from row vectors
    ///
    /// ### Params
    ///
    /// * `cells` - Cell identifiers.
    /// * `genes` - Gene identifiers.
    /// * `rows` - One vector of length `genes.len()` per cell.
    ///
    /// ### Returns
    ///
    /// The `ExpressionMatrix`.
    pub fn from_rows(cells: Vec<String>, genes: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        if rows.len() != cells.len() {
            return Err(ImputeError::invalid_parameter(format!(
                "got {} rows for {} cells",
                rows.len(),
                cells.len()
            )));
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != genes.len())
        {
            return Err(ImputeError::invalid_parameter(format!(
                "row of cell '{}' has {} values, expected {}",
                cells[idx],
                row.len(),
                genes.len()
            )));
        }

        let data = Mat::from_fn(cells.len(), genes.len(), |i, j| rows[i][j]);

        Self::new(cells, genes, data)
    }

    /// Generate the matrix from gene-by-cell data
    ///
    /// Expression tables are usually stored with genes as rows and cells as
    /// columns; this transposes them into the cell-by-gene layout.
    ///
    /// ### Params
    ///
    /// * `genes` - Gene identifiers (rows of `data`).
    /// * `cells` - Cell identifiers (columns of `data`).
    /// * `data` - Gene-by-cell matrix.
    ///
    /// ### Returns
    ///
    /// The cell-by-gene `ExpressionMatrix`.
    pub fn from_gene_by_cell(
        genes: Vec<String>,
        cells: Vec<String>,
        data: MatRef<f64>,
    ) -> Result<Self> {
        Self::new(cells, genes, data.transpose().to_owned())
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Number of genes
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Cell identifiers
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// Gene identifiers
    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    /// View on the cell-by-gene data
    pub fn data(&self) -> MatRef<'_, f64> {
        self.data.as_ref()
    }

    /// Row index of a cell
    pub fn cell_position(&self, cell: &str) -> Option<usize> {
        self.cell_index.get(cell).copied()
    }

    /// Column index of a gene
    pub fn gene_position(&self, gene: &str) -> Option<usize> {
        self.gene_index.get(gene).copied()
    }

    /// Value of a cell/gene pair by position
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    /// Expression vector of a single cell
    pub fn row_values(&self, row: usize) -> Vec<f64> {
        (0..self.n_genes()).map(|j| self.data[(row, j)]).collect()
    }

    /// Restrict and reorder the gene axis
    ///
    /// ### Params
    ///
    /// * `genes` - The genes to keep, in the order of the result.
    ///
    /// ### Returns
    ///
    /// A new `ExpressionMatrix` with the same cells and only `genes`.
    pub fn select_genes(&self, genes: &[String]) -> Result<Self> {
        let cols = genes
            .iter()
            .map(|gene| {
                self.gene_position(gene).ok_or_else(|| {
                    ImputeError::invalid_parameter(format!("gene '{}' not in matrix", gene))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        let data = select_cols(&self.data.as_ref(), &cols);

        Ok(Self {
            cells: self.cells.clone(),
            genes: genes.to_vec(),
            data,
            cell_index: self.cell_index.clone(),
            gene_index: genes
                .iter()
                .enumerate()
                .map(|(idx, gene)| (gene.clone(), idx))
                .collect(),
        })
    }

    /// Concatenate matrices along the cell axis
    ///
    /// All matrices need to have identical genes in identical order.
    ///
    /// ### Params
    ///
    /// * `parts` - The matrices to row-bind, in order.
    ///
    /// ### Returns
    ///
    /// The row-bound `ExpressionMatrix`. An empty input yields an empty
    /// matrix without genes.
    pub fn row_bind(parts: &[ExpressionMatrix]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Self::new(Vec::new(), Vec::new(), Mat::zeros(0, 0));
        };

        if let Some(part) = parts.iter().find(|part| part.genes != first.genes) {
            return Err(ImputeError::invalid_parameter(format!(
                "cannot row-bind matrices with different genes ({} vs {} genes)",
                first.n_genes(),
                part.n_genes()
            )));
        }

        let n_total: usize = parts.iter().map(|part| part.n_cells()).sum();
        let mut cells = Vec::with_capacity(n_total);
        let mut row_source = Vec::with_capacity(n_total);
        for (part_idx, part) in parts.iter().enumerate() {
            cells.extend(part.cells.iter().cloned());
            row_source.extend((0..part.n_cells()).map(|row| (part_idx, row)));
        }

        let data = Mat::from_fn(n_total, first.n_genes(), |i, j| {
            let (part_idx, row) = row_source[i];
            parts[part_idx].data[(row, j)]
        });

        Self::new(cells, first.genes.clone(), data)
    }
}

/// ClusterAssignment
///
/// Mapping of cell identifiers (from both datasets) to a cluster label.
///
/// ### Fields
///
/// * `cells` - Cell identifiers in order of appearance.
/// * `labels` - Cluster label per cell.
/// * `lookup` - Cell identifier to position.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    cells: Vec<String>,
    labels: Vec<String>,
    lookup: FxHashMap<String, usize>,
}

impl ClusterAssignment {
    /// Generate a new cluster assignment
    ///
    /// ### Params
    ///
    /// * `pairs` - `(cell, cluster label)` tuples. A cell may only occur once.
    ///
    /// ### Returns
    ///
    /// The `ClusterAssignment`.
    pub fn new(pairs: Vec<(String, String)>) -> Result<Self> {
        let (cells, labels): (Vec<String>, Vec<String>) = pairs.into_iter().unzip();
        let lookup = position_map(&cells).map_err(|cell| {
            ImputeError::invalid_parameter(format!(
                "cell '{}' has more than one cluster assignment",
                cell
            ))
        })?;

        Ok(Self {
            cells,
            labels,
            lookup,
        })
    }

    /// Number of assigned cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Are there no assignments
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cluster label of a cell, if it has one
    pub fn label_of(&self, cell: &str) -> Option<&str> {
        self.lookup.get(cell).map(|&idx| self.labels[idx].as_str())
    }

    /// Distinct cluster labels in order of first appearance
    pub fn cluster_labels(&self) -> Vec<String> {
        unique_ordered(&self.labels)
    }
}

///////////////////
// Input sources //
///////////////////

/// Where an expression matrix comes from
///
/// Resolved once at the boundary; everything downstream only sees
/// `ExpressionMatrix`.
#[derive(Debug, Clone)]
pub enum MatrixSource {
    /// Gene-by-cell tab-separated file on disk
    FilePath(PathBuf),
    /// Already loaded matrix
    InMemory(ExpressionMatrix),
}

impl MatrixSource {
    /// Resolve into an `ExpressionMatrix`, reading from disk if needed
    pub fn resolve(self) -> Result<ExpressionMatrix> {
        match self {
            MatrixSource::FilePath(path) => read_expression_matrix(&path),
            MatrixSource::InMemory(matrix) => Ok(matrix),
        }
    }
}

impl From<ExpressionMatrix> for MatrixSource {
    fn from(matrix: ExpressionMatrix) -> Self {
        MatrixSource::InMemory(matrix)
    }
}

impl From<PathBuf> for MatrixSource {
    fn from(path: PathBuf) -> Self {
        MatrixSource::FilePath(path)
    }
}

impl From<&Path> for MatrixSource {
    fn from(path: &Path) -> Self {
        MatrixSource::FilePath(path.to_path_buf())
    }
}

/// Where the cluster assignment comes from
#[derive(Debug, Clone)]
pub enum ClusterSource {
    /// Tab-separated cell identity file on disk
    FilePath(PathBuf),
    /// Already loaded assignment
    InMemory(ClusterAssignment),
}

impl ClusterSource {
    /// Resolve into a `ClusterAssignment`
    ///
    /// ### Params
    ///
    /// * `cell_name_column_idx` - Index of the column with the cell names
    ///   (only used when reading from disk).
    pub fn resolve(self, cell_name_column_idx: usize) -> Result<ClusterAssignment> {
        match self {
            ClusterSource::FilePath(path) => read_cluster_assignment(&path, cell_name_column_idx),
            ClusterSource::InMemory(clusters) => Ok(clusters),
        }
    }
}

impl From<ClusterAssignment> for ClusterSource {
    fn from(clusters: ClusterAssignment) -> Self {
        ClusterSource::InMemory(clusters)
    }
}

impl From<PathBuf> for ClusterSource {
    fn from(path: PathBuf) -> Self {
        ClusterSource::FilePath(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_new_checks_dimensions_and_duplicates() {
        let data = mat![[1.0, 2.0], [3.0, 4.0]];
        assert!(ExpressionMatrix::new(ids("c", 2), ids("g", 2), data.clone()).is_ok());
        assert!(ExpressionMatrix::new(ids("c", 3), ids("g", 2), data.clone()).is_err());

        let dup = vec!["c0".to_string(), "c0".to_string()];
        let err = ExpressionMatrix::new(dup, ids("g", 2), data).unwrap_err();
        assert!(err.to_string().contains("c0"));
    }

    #[test]
    fn test_from_gene_by_cell_transposes() {
        // genes x cells
        let data = mat![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let m = ExpressionMatrix::from_gene_by_cell(ids("g", 2), ids("c", 3), data.as_ref())
            .unwrap();

        assert_eq!(m.n_cells(), 3);
        assert_eq!(m.n_genes(), 2);
        assert_eq!(m.row_values(2), vec![3.0, 6.0]);
        assert_eq!(m.cell_position("c1"), Some(1));
        assert_eq!(m.gene_position("g1"), Some(1));
    }

    #[test]
    fn test_select_genes_reorders() {
        let m = ExpressionMatrix::from_rows(
            ids("c", 2),
            ids("g", 3),
            &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
        )
        .unwrap();

        let sub = m
            .select_genes(&["g2".to_string(), "g0".to_string()])
            .unwrap();
        assert_eq!(sub.genes(), &["g2".to_string(), "g0".to_string()]);
        assert_eq!(sub.row_values(1), vec![6.0, 4.0]);
        assert_eq!(sub.gene_position("g0"), Some(1));

        assert!(m.select_genes(&["g9".to_string()]).is_err());
    }

    #[test]
    fn test_row_bind() {
        let a = ExpressionMatrix::from_rows(ids("a", 2), ids("g", 2), &[vec![1.0, 2.0], vec![3.0, 4.0]])
            .unwrap();
        let b = ExpressionMatrix::from_rows(ids("b", 1), ids("g", 2), &[vec![5.0, 6.0]]).unwrap();

        let res = ExpressionMatrix::row_bind(&[a.clone(), b]).unwrap();
        assert_eq!(res.n_cells(), 3);
        assert_eq!(res.cells()[2], "b0");
        assert_eq!(res.row_values(2), vec![5.0, 6.0]);

        let c = ExpressionMatrix::from_rows(ids("c", 1), ids("h", 2), &[vec![0.0, 0.0]]).unwrap();
        assert!(ExpressionMatrix::row_bind(&[a, c]).is_err());

        let empty = ExpressionMatrix::row_bind(&[]).unwrap();
        assert_eq!(empty.n_cells(), 0);
    }

    #[test]
    fn test_cluster_assignment() {
        let clusters = ClusterAssignment::new(vec![
            ("c0".to_string(), "B".to_string()),
            ("d0".to_string(), "A".to_string()),
            ("c1".to_string(), "B".to_string()),
        ])
        .unwrap();

        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters.label_of("d0"), Some("A"));
        assert_eq!(clusters.label_of("x"), None);
        assert_eq!(clusters.cluster_labels(), vec!["B".to_string(), "A".to_string()]);

        let dup = ClusterAssignment::new(vec![
            ("c0".to_string(), "B".to_string()),
            ("c0".to_string(), "A".to_string()),
        ]);
        assert!(dup.is_err());
    }
}
