use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use std::hash::Hash;

//////////////////
// VECTOR STUFF //
//////////////////

/// String slice to FxHashSet
///
/// ### Params
///
/// * `x` - The string slice.
///
/// ### Returns
///
/// A HashSet with borrowed str values
pub fn string_vec_to_set(x: &[String]) -> FxHashSet<&str> {
    let mut set = FxHashSet::with_capacity_and_hasher(x.len(), FxBuildHasher);
    for s in x {
        set.insert(s.as_str());
    }
    set
}

/// Get the unique elements of a slice in order of first appearance
///
/// ### Params
///
/// * `vec` - The slice of hashable values.
///
/// ### Returns
///
/// The unique elements of `vec` as a Vec, first occurrence wins.
pub fn unique_ordered<T>(vec: &[T]) -> Vec<T>
where
    T: Clone + Eq + Hash,
{
    let mut set = FxHashSet::default();
    vec.iter()
        .filter(|&item| set.insert(item))
        .cloned()
        .collect()
}

/// Generate a lookup from identifier to position
///
/// ### Params
///
/// * `ids` - Slice of identifiers.
///
/// ### Returns
///
/// `Ok(map)` with identifier -> index, or `Err(id)` with the first
/// identifier that occurs twice.
pub fn position_map(ids: &[String]) -> Result<FxHashMap<String, usize>, String> {
    let mut map = FxHashMap::with_capacity_and_hasher(ids.len(), FxBuildHasher);
    for (idx, id) in ids.iter().enumerate() {
        if map.insert(id.clone(), idx).is_some() {
            return Err(id.clone());
        }
    }
    Ok(map)
}

/// Round a value to a fixed number of decimal places
///
/// Halfway cases are rounded away from zero.
///
/// ### Params
///
/// * `x` - The value to round.
/// * `decimals` - Number of decimal places to keep.
///
/// ### Returns
///
/// The rounded value
pub fn round_to(x: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (x * factor).round() / factor
}
