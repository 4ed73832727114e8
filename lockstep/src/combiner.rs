//! Message combiners and the buffer-folding helpers shared by the combined
//! push path.

use std::marker::PhantomData;

/// Folds messages with equal keys. Combiners must be associative and
/// commutative; the engine combines in arbitrary grouping and order.
pub trait Combiner<M>: 'static {
    /// When true, equal adjacent (key, value) pairs are deduplicated rather
    /// than folded.
    const DEDUP_ONLY: bool = false;

    /// Folds `inc` into `val`.
    fn combine(val: &mut M, inc: &M);
}

/// Sums messages per key.
pub struct SumCombiner<M>(PhantomData<M>);

impl<M> Combiner<M> for SumCombiner<M>
where
    M: for<'a> std::ops::AddAssign<&'a M> + 'static,
{
    fn combine(val: &mut M, inc: &M) {
        *val += inc;
    }
}

/// Keeps the minimum message per key.
pub struct MinCombiner<M>(PhantomData<M>);

impl<M: PartialOrd + Clone + 'static> Combiner<M> for MinCombiner<M> {
    fn combine(val: &mut M, inc: &M) {
        if inc < val {
            *val = inc.clone();
        }
    }
}

/// Keeps the maximum message per key.
pub struct MaxCombiner<M>(PhantomData<M>);

impl<M: PartialOrd + Clone + 'static> Combiner<M> for MaxCombiner<M> {
    fn combine(val: &mut M, inc: &M) {
        if inc > val {
            *val = inc.clone();
        }
    }
}

/// Deduplicates identical adjacent (key, value) pairs instead of folding.
pub struct IdenCombiner<M>(PhantomData<M>);

impl<M: PartialEq + 'static> Combiner<M> for IdenCombiner<M> {
    const DEDUP_ONLY: bool = true;

    fn combine(_val: &mut M, _inc: &M) {}
}

/// Appends `(key, msg)` to `buffer`, folding into the last entry when it
/// carries the same key.
pub fn back_combine<C, K, M>(buffer: &mut Vec<(K, M)>, key: K, msg: M)
where
    C: Combiner<M>,
    K: PartialEq,
    M: PartialEq,
{
    if C::DEDUP_ONLY {
        if buffer.last().map_or(true, |last| last.0 != key || last.1 != msg) {
            buffer.push((key, msg));
        }
        return;
    }
    match buffer.last_mut() {
        Some(last) if last.0 == key => C::combine(&mut last.1, &msg),
        _ => buffer.push((key, msg)),
    }
}

/// Folds runs of equal keys in a key-sorted buffer down to one entry each.
pub fn adj_merge<C, K, M>(buffer: &mut Vec<(K, M)>)
where
    C: Combiner<M>,
    K: PartialEq,
{
    if buffer.is_empty() {
        return;
    }
    let mut write = 0;
    for read in 1..buffer.len() {
        if buffer[write].0 == buffer[read].0 {
            let (head, tail) = buffer.split_at_mut(read);
            C::combine(&mut head[write].1, &tail[0].1);
        } else {
            write += 1;
            if write != read {
                buffer.swap(write, read);
            }
        }
    }
    buffer.truncate(write + 1);
}

/// Drops identical adjacent entries of a sorted buffer.
pub fn adj_merge_same<T: PartialEq>(buffer: &mut Vec<T>) {
    buffer.dedup();
}

/// Sorts a buffer by key and collapses it with the combiner.
pub fn combine_single<C, K, M>(buffer: &mut Vec<(K, M)>)
where
    C: Combiner<M>,
    K: Ord,
    M: PartialEq,
{
    buffer.sort_by(|a, b| a.0.cmp(&b.0));
    if C::DEDUP_ONLY {
        adj_merge_same(buffer);
    } else {
        adj_merge::<C, K, M>(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_combine_folds_runs() {
        let mut buffer = Vec::new();
        back_combine::<SumCombiner<i32>, _, _>(&mut buffer, 1u32, 2i32);
        back_combine::<SumCombiner<i32>, _, _>(&mut buffer, 1u32, 3i32);
        back_combine::<SumCombiner<i32>, _, _>(&mut buffer, 2u32, 5i32);
        assert_eq!(buffer, vec![(1, 5), (2, 5)]);
    }

    #[test]
    fn back_combine_dedups_for_iden() {
        let mut buffer = Vec::new();
        back_combine::<IdenCombiner<i32>, _, _>(&mut buffer, 1u32, 2i32);
        back_combine::<IdenCombiner<i32>, _, _>(&mut buffer, 1u32, 2i32);
        back_combine::<IdenCombiner<i32>, _, _>(&mut buffer, 1u32, 3i32);
        assert_eq!(buffer, vec![(1, 2), (1, 3)]);
    }

    #[test]
    fn combine_single_sorts_then_folds() {
        let mut buffer = vec![(3u32, 1i64), (1, 10), (3, 2), (2, 7), (1, 20)];
        combine_single::<SumCombiner<i64>, _, _>(&mut buffer);
        assert_eq!(buffer, vec![(1, 30), (2, 7), (3, 3)]);
    }

    #[test]
    fn combine_single_min() {
        let mut buffer = vec![(1u64, 9u32), (1, 4), (2, 8)];
        combine_single::<MinCombiner<u32>, _, _>(&mut buffer);
        assert_eq!(buffer, vec![(1, 4), (2, 8)]);
    }

    #[test]
    fn combine_single_dedup() {
        let mut buffer = vec![(2u32, 5i32), (1, 1), (2, 5), (1, 1), (1, 2)];
        combine_single::<IdenCombiner<i32>, _, _>(&mut buffer);
        assert_eq!(buffer, vec![(1, 1), (1, 2), (2, 5)]);
    }
}
