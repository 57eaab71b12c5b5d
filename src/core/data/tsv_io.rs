use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use faer::Mat;
use std::fs::File;
use std::path::Path;

use crate::core::data::expression::{ClusterAssignment, ExpressionMatrix};
use crate::error::{ImputeError, Result};
use crate::single_cell::neighbour_similarity::{NeighbourRecord, NeighbourTable};

///////////////////////
// Tab-separated I/O //
///////////////////////

/// Column names of the neighbour table
pub const NEIGHBOUR_TABLE_HEADER: [&str; 4] = ["cluster", "x", "y", "distance"];

/// Name of the index column of imputed matrices
pub const CELL_COLUMN: &str = "cell";

/////////////
// Helpers //
/////////////

/// Check that a path exists and points to a regular file
///
/// ### Params
///
/// * `path` - Path to check
pub fn check_input_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(ImputeError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    if !path.is_file() {
        return Err(ImputeError::InvalidInputType {
            path: path.to_path_buf(),
            reason: "expected a tab-separated file".to_string(),
        });
    }
    Ok(())
}

/// Read all records of a tab-separated file
///
/// ### Params
///
/// * `path` - Path to the file
///
/// ### Returns
///
/// Tuple of `(header, records with their line numbers)`. Empty lines are
/// skipped by the reader.
fn read_tsv_records(path: &Path) -> Result<(StringRecord, Vec<(usize, StringRecord)>)> {
    check_input_file(path)?;

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record?,
        None => {
            return Err(ImputeError::malformed(
                path.display().to_string(),
                1,
                "file is empty",
            ))
        }
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        rows.push((line, record));
    }

    Ok((header, rows))
}

/// Parse a numeric field
fn parse_value(field: &str, path: &Path, line: usize) -> Result<f64> {
    let value: f64 = field.trim().parse().map_err(|_| {
        ImputeError::malformed(
            path.display().to_string(),
            line,
            format!("'{}' is not a number", field),
        )
    })?;
    if !value.is_finite() {
        return Err(ImputeError::malformed(
            path.display().to_string(),
            line,
            format!("non-finite value '{}'", field),
        ));
    }
    Ok(value)
}

/// Read a labelled numeric table
///
/// First row: header with the index name followed by the column labels.
/// Every other row: a row label followed by one value per column label.
///
/// ### Params
///
/// * `path` - Path to the file
///
/// ### Returns
///
/// Tuple of `(column labels, row labels, row-major values)`
fn read_labelled_table(path: &Path) -> Result<(Vec<String>, Vec<String>, Vec<Vec<f64>>)> {
    let (header, records) = read_tsv_records(path)?;

    let columns: Vec<String> = header.iter().skip(1).map(|s| s.to_string()).collect();
    let mut row_labels = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len());

    for (line, record) in records {
        if record.len() != columns.len() + 1 {
            return Err(ImputeError::malformed(
                path.display().to_string(),
                line,
                format!(
                    "expected {} fields, found {}",
                    columns.len() + 1,
                    record.len()
                ),
            ));
        }
        row_labels.push(record[0].to_string());
        let row = record
            .iter()
            .skip(1)
            .map(|field| parse_value(field, path, line))
            .collect::<Result<Vec<f64>>>()?;
        values.push(row);
    }

    Ok((columns, row_labels, values))
}

/// Map identifier problems of a freshly read matrix to a table error
fn as_table_error(err: ImputeError, path: &Path) -> ImputeError {
    match err {
        ImputeError::InvalidParameter { message } => {
            ImputeError::malformed(path.display().to_string(), 1, message)
        }
        other => other,
    }
}

/////////////
// Readers //
/////////////

/// Read a gene-by-cell expression matrix
///
/// The file has genes as rows and cells as columns; the returned matrix is
/// transposed to cells as rows.
///
/// ### Params
///
/// * `path` - Path to the tab-separated file
///
/// ### Returns
///
/// The cell-by-gene `ExpressionMatrix`.
pub fn read_expression_matrix(path: &Path) -> Result<ExpressionMatrix> {
    let (cells, genes, values) = read_labelled_table(path)?;

    let data = Mat::from_fn(cells.len(), genes.len(), |i, j| values[j][i]);

    ExpressionMatrix::new(cells, genes, data).map_err(|e| as_table_error(e, path))
}

/// Read a cell-by-gene matrix with a `cell` index column
///
/// ### Params
///
/// * `path` - Path to the tab-separated file
///
/// ### Returns
///
/// The `ExpressionMatrix` as stored on disk.
pub fn read_imputed_matrix(path: &Path) -> Result<ExpressionMatrix> {
    let (genes, cells, values) = read_labelled_table(path)?;

    ExpressionMatrix::from_rows(cells, genes, &values).map_err(|e| as_table_error(e, path))
}

/// Read the cell identity (cluster) table
///
/// Leading underscores are stripped from the cell names. The cluster label is
/// taken from the first column that is not the cell name column.
///
/// ### Params
///
/// * `path` - Path to the tab-separated file with a header row
/// * `cell_name_column_idx` - Index of the column with the cell names
///
/// ### Returns
///
/// The `ClusterAssignment`.
pub fn read_cluster_assignment(path: &Path, cell_name_column_idx: usize) -> Result<ClusterAssignment> {
    let (header, records) = read_tsv_records(path)?;

    if header.len() < 2 {
        return Err(ImputeError::malformed(
            path.display().to_string(),
            1,
            "expected at least a cell name and a cluster column",
        ));
    }
    if cell_name_column_idx >= header.len() {
        return Err(ImputeError::invalid_parameter(format!(
            "cell name column {} out of range for {} columns in {}",
            cell_name_column_idx,
            header.len(),
            path.display()
        )));
    }
    let label_idx = if cell_name_column_idx == 0 { 1 } else { 0 };

    let mut pairs = Vec::with_capacity(records.len());
    for (line, record) in records {
        if record.len() != header.len() {
            return Err(ImputeError::malformed(
                path.display().to_string(),
                line,
                format!("expected {} fields, found {}", header.len(), record.len()),
            ));
        }
        let cell = record[cell_name_column_idx].trim_start_matches('_').to_string();
        pairs.push((cell, record[label_idx].to_string()));
    }

    ClusterAssignment::new(pairs).map_err(|e| as_table_error(e, path))
}

/// Read a neighbour table
///
/// Columns are located by their header names (`cluster`, `x`, `y`,
/// `distance`).
///
/// ### Params
///
/// * `path` - Path to the tab-separated file
///
/// ### Returns
///
/// The `NeighbourTable`.
pub fn read_neighbour_table(path: &Path) -> Result<NeighbourTable> {
    let (header, records) = read_tsv_records(path)?;

    let column = |name: &str| -> Result<usize> {
        header.iter().position(|h| h == name).ok_or_else(|| {
            ImputeError::malformed(
                path.display().to_string(),
                1,
                format!("missing column '{}'", name),
            )
        })
    };
    let cluster_idx = column(NEIGHBOUR_TABLE_HEADER[0])?;
    let x_idx = column(NEIGHBOUR_TABLE_HEADER[1])?;
    let y_idx = column(NEIGHBOUR_TABLE_HEADER[2])?;
    let weight_idx = column(NEIGHBOUR_TABLE_HEADER[3])?;

    let mut neighbours = Vec::with_capacity(records.len());
    for (line, record) in records {
        if record.len() != header.len() {
            return Err(ImputeError::malformed(
                path.display().to_string(),
                line,
                format!("expected {} fields, found {}", header.len(), record.len()),
            ));
        }
        neighbours.push(NeighbourRecord {
            cluster: record[cluster_idx].to_string(),
            target_cell: record[x_idx].to_string(),
            source_cell: record[y_idx].to_string(),
            weight: parse_value(&record[weight_idx], path, line)?,
        });
    }

    Ok(NeighbourTable::new(neighbours))
}

/////////////
// Writers //
/////////////

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>> {
    Ok(WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

/// Write an expression matrix in the gene-by-cell layout
///
/// Inverse of `read_expression_matrix()`.
///
/// ### Params
///
/// * `path` - Target file
/// * `matrix` - The cell-by-gene matrix
pub fn write_expression_matrix(path: &Path, matrix: &ExpressionMatrix) -> Result<()> {
    let mut writer = tsv_writer(path)?;

    let mut header = vec![String::new()];
    header.extend(matrix.cells().iter().cloned());
    writer.write_record(&header)?;

    for (j, gene) in matrix.genes().iter().enumerate() {
        let mut record = Vec::with_capacity(matrix.n_cells() + 1);
        record.push(gene.clone());
        record.extend((0..matrix.n_cells()).map(|i| matrix.value(i, j).to_string()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write a cell-by-gene matrix with a `cell` index column
///
/// ### Params
///
/// * `path` - Target file
/// * `matrix` - The matrix to write
pub fn write_imputed_matrix(path: &Path, matrix: &ExpressionMatrix) -> Result<()> {
    let mut writer = tsv_writer(path)?;

    let mut header = vec![CELL_COLUMN.to_string()];
    header.extend(matrix.genes().iter().cloned());
    writer.write_record(&header)?;

    for (i, cell) in matrix.cells().iter().enumerate() {
        let mut record = Vec::with_capacity(matrix.n_genes() + 1);
        record.push(cell.clone());
        record.extend((0..matrix.n_genes()).map(|j| matrix.value(i, j).to_string()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write the neighbour table
///
/// ### Params
///
/// * `path` - Target file
/// * `table` - The neighbour table
pub fn write_neighbour_table(path: &Path, table: &NeighbourTable) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(NEIGHBOUR_TABLE_HEADER)?;

    for record in table.records() {
        writer.write_record([
            record.cluster.as_str(),
            record.target_cell.as_str(),
            record.source_cell.as_str(),
            record.weight.to_string().as_str(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
