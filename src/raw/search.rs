use core::cmp::Ordering;

use bytes::Bytes;

/// Smallest index `i` with `keys[i] >= key`, together with a flag telling
/// whether the element there equals `key`. Returns `(keys.len(), false)` when
/// every key is smaller.
///
/// A plain scan: nodes are small and each step is one byte-slice compare, so
/// this usually beats the branchier binary variant.
pub(crate) fn lower_bound(keys: &[Bytes], key: &[u8]) -> (usize, bool) {
    for (i, stored) in keys.iter().enumerate() {
        match stored.as_ref().cmp(key) {
            Ordering::Less => {}
            Ordering::Equal => return (i, true),
            Ordering::Greater => return (i, false),
        }
    }
    (keys.len(), false)
}

/// Binary-search variant of [`lower_bound`]. Must agree with it on both
/// components for every input.
#[allow(dead_code)]
pub(crate) fn lower_bound_binary(keys: &[Bytes], key: &[u8]) -> (usize, bool) {
    match keys.binary_search_by(|stored| stored.as_ref().cmp(key)) {
        Ok(i) => (i, true),
        Err(i) => (i, false),
    }
}
