use faer::{Mat, MatRef};

////////////////////
// Util functions //
////////////////////

/// Row wise L2 normalisation
///
/// Rows with a norm of (practically) zero are left untouched, i.e., they stay
/// zero vectors.
///
/// ### Params
///
/// * `mat` - The matrix on which to apply row-wise L2 normalisation
///
/// ### Returns
///
/// The matrix with the rows being L2 normalised.
pub fn normalise_matrix_row_l2(mat: &MatRef<f64>) -> Mat<f64> {
    let mut normalised = mat.to_owned();

    for i in 0..mat.nrows() {
        let mut norm = 0_f64;
        for j in 0..mat.ncols() {
            norm += mat[(i, j)] * mat[(i, j)];
        }
        let norm = norm.sqrt();

        if norm > 1e-10 {
            for j in 0..mat.ncols() {
                normalised[(i, j)] = mat[(i, j)] / norm;
            }
        }
    }

    normalised
}

/// Select a subset of rows from a matrix
///
/// ### Params
///
/// * `mat` - The matrix to slice.
/// * `rows` - Index positions of the rows to keep, in the order they shall
///   appear in the result.
///
/// ### Returns
///
/// An owned matrix with `rows.len()` rows.
pub fn select_rows(mat: &MatRef<f64>, rows: &[usize]) -> Mat<f64> {
    Mat::from_fn(rows.len(), mat.ncols(), |i, j| mat[(rows[i], j)])
}

/// Select a subset of columns from a matrix
///
/// ### Params
///
/// * `mat` - The matrix to slice.
/// * `cols` - Index positions of the columns to keep, in the order they shall
///   appear in the result.
///
/// ### Returns
///
/// An owned matrix with `cols.len()` columns.
pub fn select_cols(mat: &MatRef<f64>, cols: &[usize]) -> Mat<f64> {
    Mat::from_fn(mat.nrows(), cols.len(), |i, j| mat[(i, cols[j])])
}
