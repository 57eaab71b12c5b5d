use crate::core::data::expression::ExpressionMatrix;
use crate::error::{ImputeError, Result};
use crate::utils::general::string_vec_to_set;

////////////////
// Structures //
////////////////

/// AlignedMatrices
///
/// Target and source matrix restricted to the shared genes.
///
/// ### Fields
///
/// * `target` - The target matrix with the shared genes only.
/// * `source` - The source matrix with the shared genes only, same column
///   order as `target`.
#[derive(Debug, Clone)]
pub struct AlignedMatrices {
    pub target: ExpressionMatrix,
    pub source: ExpressionMatrix,
}

////////////////////
// Main functions //
////////////////////

/// Get the genes present in both matrices
///
/// ### Params
///
/// * `target` - The matrix to impute for.
/// * `source` - The matrix to impute from.
///
/// ### Returns
///
/// The shared genes in the column order of `source`.
pub fn shared_genes(target: &ExpressionMatrix, source: &ExpressionMatrix) -> Vec<String> {
    let target_genes = string_vec_to_set(target.genes());

    source
        .genes()
        .iter()
        .filter(|gene| target_genes.contains(gene.as_str()))
        .cloned()
        .collect()
}

/// Align the gene axis of the target and source matrix
///
/// ### Params
///
/// * `target` - The matrix to impute for.
/// * `source` - The matrix to impute from.
///
/// ### Returns
///
/// Both matrices restricted to the shared genes, in identical column order.
/// Fails with `EmptyIntersection` if no gene is shared.
pub fn align_genes(target: &ExpressionMatrix, source: &ExpressionMatrix) -> Result<AlignedMatrices> {
    let genes = shared_genes(target, source);

    if genes.is_empty() {
        return Err(ImputeError::EmptyIntersection {
            n_target_genes: target.n_genes(),
            n_source_genes: source.n_genes(),
        });
    }

    Ok(AlignedMatrices {
        target: target.select_genes(&genes)?,
        source: source.select_genes(&genes)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(cells: &[&str], genes: &[&str], rows: &[Vec<f64>]) -> ExpressionMatrix {
        ExpressionMatrix::from_rows(
            cells.iter().map(|s| s.to_string()).collect(),
            genes.iter().map(|s| s.to_string()).collect(),
            rows,
        )
        .unwrap()
    }

    #[test]
    fn test_align_genes_same_order() {
        let target = matrix(&["c1"], &["g3", "g1", "g9"], &[vec![3.0, 1.0, 9.0]]);
        let source = matrix(
            &["d1", "d2"],
            &["g1", "g2", "g3"],
            &[vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]],
        );

        let aligned = align_genes(&target, &source).unwrap();

        let expected = vec!["g1".to_string(), "g3".to_string()];
        assert_eq!(aligned.target.genes(), expected.as_slice());
        assert_eq!(aligned.source.genes(), expected.as_slice());
        assert_eq!(aligned.target.row_values(0), vec![1.0, 3.0]);
        assert_eq!(aligned.source.row_values(1), vec![10.0, 30.0]);
        assert_eq!(aligned.target.cells(), target.cells());
    }

    #[test]
    fn test_empty_intersection() {
        let target = matrix(&["c1"], &["g1", "g2"], &[vec![1.0, 0.0]]);
        let source = matrix(&["d1"], &["g3", "g4"], &[vec![1.0, 1.0]]);

        match align_genes(&target, &source) {
            Err(ImputeError::EmptyIntersection {
                n_target_genes,
                n_source_genes,
            }) => {
                assert_eq!(n_target_genes, 2);
                assert_eq!(n_source_genes, 2);
            }
            other => panic!("expected EmptyIntersection, got {:?}", other),
        }
    }
}
