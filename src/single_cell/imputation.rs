use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::core::data::expression::ExpressionMatrix;
use crate::core::data::tsv_io::write_imputed_matrix;
use crate::error::{ImputeError, Result};
use crate::single_cell::neighbour_similarity::NeighbourTable;
use crate::single_cell::params::RunControl;
use crate::utils::general::round_to;

/// Sub directory of the output directory that holds the chunk artifacts
pub const CHUNK_DIR: &str = "imputations";

/// File name prefix of the chunk artifacts
pub const CHUNK_FILE_PREFIX: &str = "imputation_chunk_";

/// Decimal places of the imputed values
pub const IMPUTATION_DECIMALS: i32 = 2;

////////////////
// Structures //
////////////////

/// ChunkMeta
///
/// Metadata sidecar of a persisted chunk. The chunk order is defined by
/// `chunk_index`, not by the file name.
///
/// ### Fields
///
/// * `chunk_index` - Position of the chunk, starting at 0.
/// * `n_chunks` - Number of chunks of the whole run.
/// * `n_total_cells` - Number of target cells of the whole run.
/// * `start` - First target cell (position) covered by the chunk.
/// * `end` - Last target cell (position) covered by the chunk, inclusive.
/// * `n_cells` - Number of cells in the chunk.
/// * `n_genes` - Number of imputed genes.
/// * `data_file` - File name of the data file, relative to the chunk dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_index: usize,
    pub n_chunks: usize,
    pub n_total_cells: usize,
    pub start: usize,
    pub end: usize,
    pub n_cells: usize,
    pub n_genes: usize,
    pub data_file: String,
}

/// ImputedChunk
///
/// ### Fields
///
/// * `chunk_index` - Position of the chunk, starting at 0.
/// * `n_chunks` - Number of chunks of the whole run.
/// * `n_total_cells` - Number of target cells of the whole run.
/// * `start` - First target cell covered by the chunk.
/// * `end` - Last target cell covered by the chunk, inclusive.
/// * `profiles` - The imputed profiles; cells x source genes.
#[derive(Debug, Clone)]
pub struct ImputedChunk {
    pub chunk_index: usize,
    pub n_chunks: usize,
    pub n_total_cells: usize,
    pub start: usize,
    pub end: usize,
    pub profiles: ExpressionMatrix,
}

/////////////
// Helpers //
/////////////

/// File stem of a chunk artifact
pub fn chunk_file_stem(chunk_index: usize) -> String {
    format!("{}{:05}", CHUNK_FILE_PREFIX, chunk_index)
}

/// Remove chunk artifacts of earlier runs from a chunk directory
///
/// Only files named `imputation_chunk_*.tsv` or `imputation_chunk_*.json`
/// are deleted.
///
/// ### Params
///
/// * `chunk_dir` - The chunk directory; needs to exist.
///
/// ### Returns
///
/// The number of removed files.
pub fn clear_chunk_artifacts(chunk_dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(chunk_dir)? {
        let path = entry?.path();
        let is_artifact = path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(CHUNK_FILE_PREFIX))
            && path
                .extension()
                .is_some_and(|ext| ext == "tsv" || ext == "json");
        if is_artifact {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Split the target cells into consecutive chunks
///
/// ### Params
///
/// * `n_cells` - Total number of target cells.
/// * `chunk_size` - Maximum number of cells per chunk. Needs to be `> 0`.
///
/// ### Returns
///
/// `ceil(n_cells / chunk_size)` half-open ranges; the last one may be
/// shorter.
pub fn chunk_ranges(n_cells: usize, chunk_size: usize) -> Result<Vec<Range<usize>>> {
    if chunk_size == 0 {
        return Err(ImputeError::invalid_parameter(
            "chunk_size needs to be a positive integer",
        ));
    }

    Ok((0..n_cells)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(n_cells))
        .collect())
}

/// Impute the expression profile of a single target cell
///
/// ### Params
///
/// * `cell` - The target cell.
/// * `table` - The neighbour table.
/// * `source` - The source matrix with all genes to impute.
///
/// ### Returns
///
/// The similarity-weighted average of the neighbour profiles, rounded to two
/// decimal places.
pub fn impute_cell(cell: &str, table: &NeighbourTable, source: &ExpressionMatrix) -> Result<Vec<f64>> {
    let neighbours = table.neighbours_of(cell);
    if neighbours.is_empty() {
        return Err(ImputeError::NoNeighbours {
            cell: cell.to_string(),
        });
    }

    let n_genes = source.n_genes();
    let mut profile = vec![0_f64; n_genes];
    let mut weight_sum = 0_f64;

    for record in neighbours {
        let weight = record.weight;
        if !weight.is_finite() || weight < 0.0 {
            return Err(ImputeError::invalid_parameter(format!(
                "neighbour weight {} of target cell '{}' (source cell '{}') is not a non-negative number",
                weight, cell, record.source_cell
            )));
        }
        let row = source
            .cell_position(&record.source_cell)
            .ok_or_else(|| ImputeError::unknown_cell(record.source_cell.as_str(), "source"))?;

        for (j, value) in profile.iter_mut().enumerate() {
            *value += weight * source.value(row, j);
        }
        weight_sum += weight;
    }

    if weight_sum == 0.0 {
        return Err(ImputeError::ZeroWeightSum {
            cell: cell.to_string(),
        });
    }

    Ok(profile
        .into_iter()
        .map(|value| round_to(value / weight_sum, IMPUTATION_DECIMALS))
        .collect())
}

/// Impute one chunk of target cells
///
/// The cells of the chunk are processed in parallel; the result keeps the
/// order of the target cells.
///
/// ### Params
///
/// * `chunk_index` - Index of this chunk.
/// * `n_chunks` - Number of chunks of the run.
/// * `range` - Positions of the target cells in this chunk.
/// * `target_cells` - All target cell identifiers.
/// * `source` - The source matrix.
/// * `table` - The neighbour table.
///
/// ### Returns
///
/// The `ImputedChunk`.
pub fn impute_chunk(
    chunk_index: usize,
    n_chunks: usize,
    range: Range<usize>,
    target_cells: &[String],
    source: &ExpressionMatrix,
    table: &NeighbourTable,
) -> Result<ImputedChunk> {
    let cells = &target_cells[range.clone()];

    let rows: Vec<Vec<f64>> = cells
        .par_iter()
        .map(|cell| impute_cell(cell, table, source))
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let profiles = ExpressionMatrix::from_rows(cells.to_vec(), source.genes().to_vec(), &rows)?;

    Ok(ImputedChunk {
        chunk_index,
        n_chunks,
        n_total_cells: target_cells.len(),
        start: range.start,
        end: range.end.saturating_sub(1),
        profiles,
    })
}

/// Persist a chunk as data file plus metadata sidecar
///
/// The data file is written first; the metadata only appears once the data
/// is complete.
///
/// ### Params
///
/// * `chunk_dir` - Directory for the chunk artifacts.
/// * `chunk` - The chunk to write.
///
/// ### Returns
///
/// The written `ChunkMeta`.
pub fn write_chunk(chunk_dir: &Path, chunk: &ImputedChunk) -> Result<ChunkMeta> {
    let stem = chunk_file_stem(chunk.chunk_index);
    let data_file = format!("{}.tsv", stem);

    write_imputed_matrix(&chunk_dir.join(&data_file), &chunk.profiles)?;

    let meta = ChunkMeta {
        chunk_index: chunk.chunk_index,
        n_chunks: chunk.n_chunks,
        n_total_cells: chunk.n_total_cells,
        start: chunk.start,
        end: chunk.end,
        n_cells: chunk.profiles.n_cells(),
        n_genes: chunk.profiles.n_genes(),
        data_file,
    };

    let mut writer = BufWriter::new(File::create(chunk_dir.join(format!("{}.json", stem)))?);
    serde_json::to_writer_pretty(&mut writer, &meta)?;
    writer.flush()?;

    Ok(meta)
}

/// Drive the chunked imputation
///
/// Chunks are processed strictly in order. Cancellation and the deadline are
/// checked before each chunk.
///
/// ### Params
///
/// * `target_cells` - Target cell identifiers; their order defines chunks.
/// * `source` - The source matrix.
/// * `table` - The neighbour table.
/// * `chunk_size` - Cells per chunk.
/// * `control` - Deadline and cancellation.
/// * `verbose` - Controls verbosity of the function.
/// * `sink` - Receives every finished chunk.
///
/// ### Returns
///
/// The number of processed chunks.
fn run_chunks<F>(
    target_cells: &[String],
    source: &ExpressionMatrix,
    table: &NeighbourTable,
    chunk_size: usize,
    control: &RunControl,
    verbose: bool,
    mut sink: F,
) -> Result<usize>
where
    F: FnMut(ImputedChunk) -> Result<()>,
{
    let ranges = chunk_ranges(target_cells.len(), chunk_size)?;
    let n_chunks = ranges.len();

    let start = Instant::now();

    for (chunk_index, range) in ranges.into_iter().enumerate() {
        control.check_between_chunks(chunk_index)?;

        debug!(
            "Imputation of chunk {}/{}: cells {} to {}",
            chunk_index + 1,
            n_chunks,
            range.start,
            range.end
        );

        let chunk = impute_chunk(chunk_index, n_chunks, range, target_cells, source, table)?;
        sink(chunk)?;

        if verbose && (chunk_index + 1) % 10 == 0 {
            info!(
                "Imputed {} out of {} chunks: {:.2?}",
                chunk_index + 1,
                n_chunks,
                start.elapsed()
            );
        }
    }

    if verbose {
        info!(
            "Imputed {} cells in {} chunks: {:.2?}",
            target_cells.len(),
            n_chunks,
            start.elapsed()
        );
    }

    Ok(n_chunks)
}

////////////////////
// Main functions //
////////////////////

/// Run the chunked imputation in memory
///
/// ### Params
///
/// * `target_cells` - Target cell identifiers; their order defines chunks.
/// * `source` - The source matrix with all genes to impute.
/// * `table` - The neighbour table.
/// * `chunk_size` - Cells per chunk. Needs to be `> 0`.
/// * `control` - Deadline and cancellation.
/// * `verbose` - Controls verbosity of the function.
///
/// ### Returns
///
/// All chunks in chunk order.
pub fn impute_expression(
    target_cells: &[String],
    source: &ExpressionMatrix,
    table: &NeighbourTable,
    chunk_size: usize,
    control: &RunControl,
    verbose: bool,
) -> Result<Vec<ImputedChunk>> {
    let mut chunks = Vec::new();
    run_chunks(
        target_cells,
        source,
        table,
        chunk_size,
        control,
        verbose,
        |chunk| {
            chunks.push(chunk);
            Ok(())
        },
    )?;
    Ok(chunks)
}

/// Run the chunked imputation and persist every chunk
///
/// Only one chunk is held in memory at a time. Chunk artifacts of earlier
/// runs in `chunk_dir` are removed first. On cancellation or failure the
/// chunks written so far stay on disk.
///
/// ### Params
///
/// * `target_cells` - Target cell identifiers; their order defines chunks.
/// * `source` - The source matrix with all genes to impute.
/// * `table` - The neighbour table.
/// * `chunk_size` - Cells per chunk. Needs to be `> 0`.
/// * `chunk_dir` - Directory for the chunk artifacts; created if absent.
/// * `control` - Deadline and cancellation.
/// * `verbose` - Controls verbosity of the function.
///
/// ### Returns
///
/// The metadata of all written chunks in chunk order.
pub fn impute_expression_to_dir(
    target_cells: &[String],
    source: &ExpressionMatrix,
    table: &NeighbourTable,
    chunk_size: usize,
    chunk_dir: &Path,
    control: &RunControl,
    verbose: bool,
) -> Result<Vec<ChunkMeta>> {
    fs::create_dir_all(chunk_dir)?;
    let n_stale = clear_chunk_artifacts(chunk_dir)?;
    if n_stale > 0 {
        debug!(
            "Removed {} chunk artifacts of an earlier run from {}",
            n_stale,
            chunk_dir.display()
        );
    }

    let mut metas = Vec::new();
    run_chunks(
        target_cells,
        source,
        table,
        chunk_size,
        control,
        verbose,
        |chunk| {
            metas.push(write_chunk(chunk_dir, &chunk)?);
            Ok(())
        },
    )?;
    Ok(metas)
}
