use faer::MatRef;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

///////////////
// Top-k kNN //
///////////////

/// Helper struct for top-k selection with a heap
///
/// ### Fields
///
/// * `index` - Index position of that neighbour
/// * `similarity` - Similarity value for that neighbour
#[derive(Debug, Clone, Copy)]
struct SimilarityItem {
    index: usize,
    similarity: f64,
}

/// `PartialEq` trait for `SimilarityItem`
///
/// Two items are equal if they share similarity and index.
impl PartialEq for SimilarityItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// Equality Trait for SimilarityItem
impl Eq for SimilarityItem {}

/// Ord trait `SimilarityItem`
///
/// The "largest" item is the worst neighbour: lowest similarity and, among
/// equal similarities, the highest index. With a max-heap the worst neighbour
/// sits on top and can be popped once more than k items were pushed.
impl Ord for SimilarityItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// PartialOrd trait `SimilarityItem`
impl PartialOrd for SimilarityItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Get the top-k most similar items from a row of similarities
///
/// Ties are broken by position: of two equal similarities, the one with the
/// lower index is ranked first. `-0.0` counts as `0.0`.
///
/// ### Params
///
/// * `similarities` - Iterator over the similarity values; the position in
///   the iterator is the index of the item.
/// * `k` - Number of neighbours to keep.
///
/// ### Returns
///
/// Vector of `(index, similarity)` with `min(k, n)` entries, sorted from the
/// most to the least similar item.
pub fn top_k_similar<I>(similarities: I, k: usize) -> Vec<(usize, f64)>
where
    I: IntoIterator<Item = f64>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut heap = BinaryHeap::with_capacity(k + 1);

    for (index, similarity) in similarities.into_iter().enumerate() {
        // total_cmp orders -0.0 below 0.0
        let similarity = if similarity == 0.0 { 0.0 } else { similarity };
        heap.push(SimilarityItem { index, similarity });
        if heap.len() > k {
            heap.pop(); // drop the current worst
        }
    }

    // ascending order under `Ord` is best first
    heap.into_sorted_vec()
        .into_iter()
        .map(|item| (item.index, item.similarity))
        .collect()
}

/// Get the top-k columns per row of a similarity matrix
///
/// ### Params
///
/// * `similarities` - Similarity matrix with rows = queries and columns =
///   candidates.
/// * `k` - Number of neighbours to keep per row.
///
/// ### Returns
///
/// Per row a vector of `(column index, similarity)`, best first.
pub fn top_k_per_row(similarities: &MatRef<f64>, k: usize) -> Vec<Vec<(usize, f64)>> {
    let ncols = similarities.ncols();

    (0..similarities.nrows())
        .into_par_iter()
        .map(|i| top_k_similar((0..ncols).map(|j| similarities[(i, j)]), k))
        .collect()
}
