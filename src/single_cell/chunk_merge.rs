use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::core::data::expression::ExpressionMatrix;
use crate::core::data::tsv_io::{read_imputed_matrix, write_imputed_matrix};
use crate::error::{ImputeError, Result};
use crate::single_cell::imputation::{ChunkMeta, ImputedChunk};

/// File name of the merged imputation
pub const IMPUTATION_FILE: &str = "imputation.tsv";

/// ChunkArtifact
///
/// A chunk metadata file as found on disk.
///
/// ### Fields
///
/// * `meta_file` - Path of the metadata sidecar.
/// * `meta` - Its content.
#[derive(Debug, Clone)]
pub struct ChunkArtifact {
    pub meta_file: PathBuf,
    pub meta: ChunkMeta,
}

/////////////
// Helpers //
/////////////

/// Sort chunks by index and check they form the complete sequence
/// `0..n_chunks` of a single run
fn order_chunks(mut chunks: Vec<ImputedChunk>) -> Result<Vec<ImputedChunk>> {
    chunks.sort_by_key(|chunk| chunk.chunk_index);

    if let Some(pair) = chunks
        .windows(2)
        .find(|pair| pair[0].chunk_index == pair[1].chunk_index)
    {
        return Err(ImputeError::DuplicateChunk {
            index: pair[0].chunk_index,
        });
    }

    let Some(first) = chunks.first() else {
        return Ok(chunks);
    };
    let (n_chunks, n_total_cells) = (first.n_chunks, first.n_total_cells);

    if let Some(chunk) = chunks
        .iter()
        .find(|chunk| chunk.n_chunks != n_chunks || chunk.n_total_cells != n_total_cells)
    {
        return Err(ImputeError::malformed(
            format!("chunk {}", chunk.chunk_index),
            0,
            format!(
                "belongs to a run with {} chunks and {} cells, chunk {} to a run with {} chunks and {} cells",
                chunk.n_chunks, chunk.n_total_cells, first.chunk_index, n_chunks, n_total_cells
            ),
        ));
    }

    // first gap inside the found indices, else the first index after them
    let expected = chunks
        .iter()
        .enumerate()
        .find(|(idx, chunk)| chunk.chunk_index != *idx)
        .map(|(idx, _)| idx)
        .or((chunks.len() < n_chunks).then_some(chunks.len()));

    if let Some(expected) = expected {
        return Err(ImputeError::MissingChunk {
            expected,
            found: chunks.iter().map(|chunk| chunk.chunk_index).collect(),
        });
    }

    if chunks.len() > n_chunks {
        return Err(ImputeError::malformed(
            format!("chunk {}", n_chunks),
            0,
            format!("index beyond the {} chunks of the run", n_chunks),
        ));
    }

    Ok(chunks)
}

/// Check that the chunk ranges tile all target cells of the run without gaps
fn check_contiguity(chunks: &[ImputedChunk]) -> Result<()> {
    let mut next_start = 0;

    for chunk in chunks {
        let n_cells = chunk.profiles.n_cells();
        if chunk.start != next_start || n_cells == 0 || chunk.end + 1 != chunk.start + n_cells {
            return Err(ImputeError::malformed(
                format!("chunk {}", chunk.chunk_index),
                0,
                format!(
                    "covers cells {} to {} with {} rows, expected to start at cell {}",
                    chunk.start, chunk.end, n_cells, next_start
                ),
            ));
        }
        next_start = chunk.end + 1;
    }

    if let Some(last) = chunks.last() {
        if next_start != last.n_total_cells {
            return Err(ImputeError::malformed(
                format!("chunk {}", last.chunk_index),
                0,
                format!(
                    "chunks cover {} of the {} target cells",
                    next_start, last.n_total_cells
                ),
            ));
        }
    }

    Ok(())
}

/// Paths of all chunk metadata files in a directory, sorted by name
fn metadata_files(chunk_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(chunk_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Resolve the data file of a sidecar; only plain file names are accepted
fn data_file_path(chunk_dir: &Path, meta_file: &Path, data_file: &str) -> Result<PathBuf> {
    let mut components = Path::new(data_file).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(chunk_dir.join(data_file)),
        _ => Err(ImputeError::malformed(
            meta_file.display().to_string(),
            0,
            format!("data file '{}' is not a plain file name", data_file),
        )),
    }
}

/////////////
// Loading //
/////////////

/// Read all persisted chunks of a directory
///
/// ### Params
///
/// * `chunk_dir` - Directory with the chunk data and metadata files.
///
/// ### Returns
///
/// Tuple of `(chunks, artifacts)`, not yet in chunk order.
pub fn read_chunk_dir(chunk_dir: &Path) -> Result<(Vec<ImputedChunk>, Vec<ChunkArtifact>)> {
    if !chunk_dir.is_dir() {
        return Err(ImputeError::InvalidInputType {
            path: chunk_dir.to_path_buf(),
            reason: "expected a directory with imputation chunks".to_string(),
        });
    }

    let mut chunks = Vec::new();
    let mut artifacts = Vec::new();

    for meta_file in metadata_files(chunk_dir)? {
        let meta: ChunkMeta = serde_json::from_reader(BufReader::new(File::open(&meta_file)?))?;
        let data_path = data_file_path(chunk_dir, &meta_file, &meta.data_file)?;
        let profiles = read_imputed_matrix(&data_path)?;

        if profiles.n_cells() != meta.n_cells {
            return Err(ImputeError::malformed(
                data_path.display().to_string(),
                0,
                format!(
                    "metadata announces {} cells, file has {}",
                    meta.n_cells,
                    profiles.n_cells()
                ),
            ));
        }

        debug!(
            "Loaded chunk {} from {}",
            meta.chunk_index,
            data_path.display()
        );

        chunks.push(ImputedChunk {
            chunk_index: meta.chunk_index,
            n_chunks: meta.n_chunks,
            n_total_cells: meta.n_total_cells,
            start: meta.start,
            end: meta.end,
            profiles,
        });
        artifacts.push(ChunkArtifact { meta_file, meta });
    }

    Ok((chunks, artifacts))
}

/// Delete the chunk artifacts and the directory, if it ends up empty
fn remove_artifacts(chunk_dir: &Path, artifacts: &[ChunkArtifact]) -> Result<()> {
    for artifact in artifacts {
        let data_path = chunk_dir.join(&artifact.meta.data_file);
        if data_path.exists() {
            fs::remove_file(&data_path)?;
        }
        if artifact.meta_file.exists() {
            fs::remove_file(&artifact.meta_file)?;
        }
    }

    if fs::read_dir(chunk_dir)?.next().is_none() {
        fs::remove_dir(chunk_dir)?;
    }

    Ok(())
}

////////////////////
// Main functions //
////////////////////

/// Merge imputed chunks into the final matrix
///
/// ### Params
///
/// * `chunks` - The chunks in any order.
///
/// ### Returns
///
/// The imputed matrix with the target cells in chunk order. Fails on
/// missing or duplicated chunk indices (including trailing ones), chunks of
/// different runs, gaps in the cell ranges and differing gene columns.
pub fn merge_chunks(chunks: Vec<ImputedChunk>) -> Result<ExpressionMatrix> {
    let chunks = order_chunks(chunks)?;
    check_contiguity(&chunks)?;

    if let Some(first) = chunks.first() {
        if let Some(chunk) = chunks
            .iter()
            .find(|chunk| chunk.profiles.genes() != first.profiles.genes())
        {
            return Err(ImputeError::malformed(
                format!("chunk {}", chunk.chunk_index),
                1,
                "gene columns differ from chunk 0",
            ));
        }
    }

    let parts: Vec<ExpressionMatrix> = chunks.into_iter().map(|chunk| chunk.profiles).collect();

    ExpressionMatrix::row_bind(&parts)
}

/// Merge the chunks of a directory and write the final imputation
///
/// ### Params
///
/// * `chunk_dir` - Directory with the chunk artifacts.
/// * `outdir` - Directory for `imputation.tsv`.
/// * `keep_artifacts` - Keep the chunk files after the merge.
/// * `verbose` - Controls verbosity of the function.
///
/// ### Returns
///
/// The merged imputed matrix.
pub fn merge_chunk_dir(
    chunk_dir: &Path,
    outdir: &Path,
    keep_artifacts: bool,
    verbose: bool,
) -> Result<ExpressionMatrix> {
    let start = Instant::now();

    let (chunks, artifacts) = read_chunk_dir(chunk_dir)?;
    let n_chunks = chunks.len();
    let merged = merge_chunks(chunks)?;

    fs::create_dir_all(outdir)?;
    write_imputed_matrix(&outdir.join(IMPUTATION_FILE), &merged)?;

    if !keep_artifacts {
        remove_artifacts(chunk_dir, &artifacts)?;
    }

    if verbose {
        info!(
            "Merged {} chunks into {} cells x {} genes: {:.2?}",
            n_chunks,
            merged.n_cells(),
            merged.n_genes(),
            start.elapsed()
        );
    }

    Ok(merged)
}
