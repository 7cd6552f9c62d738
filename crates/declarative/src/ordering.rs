//! Minimal moves for ordered facilities.
//!
//! Given the current order of a facility and a block of records that must
//! appear contiguously, in a given order, starting at a given position, the
//! target order is the facility without the block, with the block inserted
//! at the position. A maximum-weight increasing subsequence of the target
//! (by current index) stays where it is. Records outside the block weigh
//! more than the whole block together, so they are never moved. Everything
//! else is moved, walking the target backwards, to just before its
//! successor.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// One planned move: the item, and the item it must precede (`None` for
/// the end).
pub type Move<K> = (K, Option<K>);

/// Target order for `block` placed at 0-based `offset` among the other
/// records of `current`. The offset is clamped to the end.
pub fn target_order<K: Clone + Eq + Hash>(current: &[K], block: &[K], offset: usize) -> Vec<K> {
    let in_block: HashSet<&K> = block.iter().collect();
    let others: Vec<K> = current.iter().filter(|k| !in_block.contains(k)).cloned().collect();
    let offset = offset.min(others.len());

    let mut target = Vec::with_capacity(current.len());
    target.extend_from_slice(&others[..offset]);
    target.extend_from_slice(block);
    target.extend_from_slice(&others[offset..]);
    target
}

/// Moves turning `current` into `target_order(current, block, offset)`.
///
/// Every block item must occur in `current`; duplicates are not allowed.
pub fn plan_moves<K: Clone + Eq + Hash>(current: &[K], block: &[K], offset: usize) -> Vec<Move<K>> {
    let target = target_order(current, block, offset);
    let index: HashMap<&K, usize> = current.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let in_block: HashSet<&K> = block.iter().collect();
    let heavy = block.len() as u64 + 1;

    let positions: Vec<usize> = target.iter().map(|k| index.get(k).copied().unwrap_or(usize::MAX)).collect();
    let weights: Vec<u64> = target
        .iter()
        .map(|k| if in_block.contains(k) { 1 } else { heavy })
        .collect();

    // best[j]: weight of the heaviest increasing run ending at j
    let n = target.len();
    let mut best = vec![0u64; n];
    let mut prev = vec![None; n];
    for j in 0..n {
        best[j] = weights[j];
        for i in 0..j {
            if positions[i] < positions[j] && best[i] + weights[j] > best[j] {
                best[j] = best[i] + weights[j];
                prev[j] = Some(i);
            }
        }
    }

    let mut keep = vec![false; n];
    let mut cursor = (0..n).max_by_key(|&j| (best[j], std::cmp::Reverse(j)));
    while let Some(j) = cursor {
        keep[j] = true;
        cursor = prev[j];
    }

    let mut moves = Vec::new();
    for j in (0..n).rev() {
        if !keep[j] {
            moves.push((target[j].clone(), target.get(j + 1).cloned()));
        }
    }
    moves
}
