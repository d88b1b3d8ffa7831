//! Cleaning of classified rasters
//!
//! Classification output is noisy at the cell level: nodata holes where no
//! features were valid, and single-cell speckle. The tools here fill holes
//! by propagating the surrounding classes inward, flip speckle to the local
//! majority, and drop clusters too small to be real.

use crate::maybe_rayon::*;
use log::debug;
use ndarray::Array2;
use terraclass_core::raster::Raster;
use terraclass_core::{Error, Result};

/// 8-connected neighbor offsets: (row_offset, col_offset)
const D8_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Fill nodata cells from their valid neighbors, propagating inward.
///
/// Works as a worklist in waves: every nodata cell with at least one valid
/// 8-neighbor takes the most common class among those neighbors, computed
/// against the state before the wave; newly filled cells seed the next
/// wave. Ties go to the lowest class code. A nodata region no wave can
/// reach (no valid neighbor anywhere on its boundary) stays nodata — that
/// is the terminal state, not an error. Runs to a fixed point, so applying
/// it twice equals applying it once.
pub fn fill_nearest_neighbor(raster: &Raster<u8>) -> Result<Raster<u8>> {
    let Some(nd) = raster.nodata() else {
        return Ok(raster.clone());
    };
    let (rows, cols) = raster.shape();
    let mut out = raster.clone();

    let mut queued = Array2::<bool>::from_elem((rows, cols), false);
    let mut frontier: Vec<(usize, usize)> = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            if unsafe { out.get_unchecked(row, col) } != nd {
                continue;
            }
            if has_valid_neighbor(&out, row, col, nd) {
                queued[(row, col)] = true;
                frontier.push((row, col));
            }
        }
    }

    // Every frontier cell gets filled, so the wave count is bounded by the
    // cell count even on pathological nodata topologies.
    let mut waves = 0;
    let max_waves = rows * cols;
    while !frontier.is_empty() && waves < max_waves {
        waves += 1;

        let fills: Vec<((usize, usize), u8)> = frontier
            .iter()
            .map(|&(row, col)| ((row, col), neighbor_majority(&out, row, col, nd)))
            .collect();

        let mut next: Vec<(usize, usize)> = Vec::new();
        for ((row, col), value) in fills {
            unsafe { out.set_unchecked(row, col, value) };
            for &(dr, dc) in &D8_OFFSETS {
                let nr = row as isize + dr;
                let nc = col as isize + dc;
                if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                if !queued[(nr, nc)] && unsafe { out.get_unchecked(nr, nc) } == nd {
                    queued[(nr, nc)] = true;
                    next.push((nr, nc));
                }
            }
        }
        frontier = next;
    }
    debug!("nodata fill converged after {} waves", waves);

    Ok(out)
}

fn has_valid_neighbor(raster: &Raster<u8>, row: usize, col: usize, nd: u8) -> bool {
    let (rows, cols) = raster.shape();
    D8_OFFSETS.iter().any(|&(dr, dc)| {
        let nr = row as isize + dr;
        let nc = col as isize + dc;
        nr >= 0
            && nc >= 0
            && nr < rows as isize
            && nc < cols as isize
            && unsafe { raster.get_unchecked(nr as usize, nc as usize) } != nd
    })
}

/// Most common class among the valid 8-neighbors; lowest code wins ties.
/// Caller guarantees at least one valid neighbor.
fn neighbor_majority(raster: &Raster<u8>, row: usize, col: usize, nd: u8) -> u8 {
    let (rows, cols) = raster.shape();
    let mut counts = [0u32; 256];
    for &(dr, dc) in &D8_OFFSETS {
        let nr = row as isize + dr;
        let nc = col as isize + dc;
        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
            continue;
        }
        let v = unsafe { raster.get_unchecked(nr as usize, nc as usize) };
        if v != nd {
            counts[v as usize] += 1;
        }
    }
    let mut best = 0usize;
    for (code, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = code;
        }
    }
    best as u8
}

/// Replace each cell with the most frequent value in its 3x3 neighborhood.
///
/// Nodata participates as its own bin but loses every tie against a real
/// class; a cell whose neighborhood majority is nodata becomes nodata. Ties
/// between real classes go to the lowest code. Repeating the vote smooths
/// progressively larger speckle.
pub fn majority_vote(raster: &Raster<u8>, iterations: usize) -> Result<Raster<u8>> {
    let (rows, cols) = raster.shape();
    let nd = raster.nodata();
    let mut current = raster.clone();

    for _ in 0..iterations {
        let data: Vec<u8> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![0u8; cols];
                for (col, out_cell) in row_data.iter_mut().enumerate() {
                    *out_cell = window_majority(&current, row, col, nd);
                }
                row_data
            })
            .collect();

        let mut next = current.like(0);
        *next.data_mut() = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        current = next;
    }

    Ok(current)
}

fn window_majority(raster: &Raster<u8>, row: usize, col: usize, nd: Option<u8>) -> u8 {
    let (rows, cols) = raster.shape();
    let mut counts = [0u32; 256];
    let mut nd_count = 0u32;
    for dr in -1isize..=1 {
        for dc in -1isize..=1 {
            let nr = row as isize + dr;
            let nc = col as isize + dc;
            if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                continue;
            }
            let v = unsafe { raster.get_unchecked(nr as usize, nc as usize) };
            if nd == Some(v) {
                nd_count += 1;
            } else {
                counts[v as usize] += 1;
            }
        }
    }
    let mut best = 0usize;
    for (code, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = code;
        }
    }
    if let Some(nd) = nd {
        // Nodata wins only with a strict majority
        if nd_count > counts[best] {
            return nd;
        }
    }
    best as u8
}

/// Set 8-connected same-value clusters smaller than `min_cluster_size`
/// cells to nodata.
pub fn sieve(raster: &Raster<u8>, min_cluster_size: usize) -> Result<Raster<u8>> {
    let Some(nd) = raster.nodata() else {
        return Err(Error::Other(
            "sieve requires a raster with a nodata sentinel".to_string(),
        ));
    };
    let (rows, cols) = raster.shape();
    let mut out = raster.clone();
    let mut visited = Array2::<bool>::from_elem((rows, cols), false);
    let mut component: Vec<(usize, usize)> = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            if visited[(row, col)] {
                continue;
            }
            let value = unsafe { raster.get_unchecked(row, col) };
            if value == nd {
                visited[(row, col)] = true;
                continue;
            }

            component.clear();
            stack.clear();
            stack.push((row, col));
            visited[(row, col)] = true;
            while let Some((r, c)) = stack.pop() {
                component.push((r, c));
                for &(dr, dc) in &D8_OFFSETS {
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;
                    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if !visited[(nr, nc)]
                        && unsafe { raster.get_unchecked(nr, nc) } == value
                    {
                        visited[(nr, nc)] = true;
                        stack.push((nr, nc));
                    }
                }
            }

            if component.len() < min_cluster_size {
                for &(r, c) in &component {
                    unsafe { out.set_unchecked(r, c, nd) };
                }
            }
        }
    }

    Ok(out)
}

/// Full denoising pass: two majority votes, nodata fill, one final vote.
pub fn denoise(raster: &Raster<u8>) -> Result<Raster<u8>> {
    let voted = majority_vote(raster, 2)?;
    let filled = fill_nearest_neighbor(&voted)?;
    majority_vote(&filled, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use terraclass_core::raster::GeoTransform;

    fn classified(rows: usize, cols: usize, values: &[u8]) -> Raster<u8> {
        let mut r = Raster::from_vec(values.to_vec(), rows, cols).unwrap();
        r.set_transform(GeoTransform::north_up(0.0, rows as f64, 1.0));
        r.set_nodata(Some(255));
        r
    }

    #[test]
    fn test_fill_hole_in_ring() {
        let n = 255u8;
        #[rustfmt::skip]
        let values = vec![
            2, 2, 2, 2, 2,
            2, n, n, n, 2,
            2, n, n, n, 2,
            2, n, n, n, 2,
            2, 2, 2, 2, 2,
        ];
        let r = classified(5, 5, &values);
        let filled = fill_nearest_neighbor(&r).unwrap();
        for row in 0..5 {
            for col in 0..5 {
                assert_eq!(filled.get(row, col).unwrap(), 2, "cell ({row},{col})");
            }
        }
    }

    #[test]
    fn test_fill_is_idempotent() {
        let n = 255u8;
        #[rustfmt::skip]
        let values = vec![
            1, 1, n, 3, 3,
            1, n, n, n, 3,
            1, n, n, n, 3,
            1, n, n, n, 3,
            1, 1, n, 3, 3,
        ];
        let r = classified(5, 5, &values);
        let once = fill_nearest_neighbor(&r).unwrap();
        let twice = fill_nearest_neighbor(&once).unwrap();
        assert_eq!(once.data(), twice.data());
    }

    #[test]
    fn test_fill_tie_break_lowest_class() {
        let n = 255u8;
        // The center nodata cell sees two 1s and two 2s
        #[rustfmt::skip]
        let values = vec![
            n, 1, n,
            2, n, 1,
            n, 2, n,
        ];
        let r = classified(3, 3, &values);
        let filled = fill_nearest_neighbor(&r).unwrap();
        assert_eq!(filled.get(1, 1).unwrap(), 1);
    }

    #[test]
    fn test_all_nodata_stays_nodata() {
        let r = classified(4, 4, &[255u8; 16]);
        let filled = fill_nearest_neighbor(&r).unwrap();
        assert!(filled.data().iter().all(|&v| v == 255));
    }

    #[test]
    fn test_fill_without_nodata_sentinel_is_identity() {
        let mut r = classified(2, 2, &[1, 2, 3, 4]);
        r.set_nodata(None);
        let filled = fill_nearest_neighbor(&r).unwrap();
        assert_eq!(filled.data(), r.data());
    }

    #[test]
    fn test_majority_vote_flips_speckle() {
        let mut values = vec![4u8; 25];
        values[12] = 7; // lone disagreeing cell
        let r = classified(5, 5, &values);
        let voted = majority_vote(&r, 1).unwrap();
        assert_eq!(voted.get(2, 2).unwrap(), 4);
    }

    #[test]
    fn test_majority_vote_nodata_loses_ties() {
        let n = 255u8;
        // Corner cell sees itself, one 1 and two nodata: 1 has count 2
        // (self is nodata), nodata has count 2 -- the tie goes to the class
        #[rustfmt::skip]
        let values = vec![
            n, 1, 4,
            1, n, 4,
            4, 4, 4,
        ];
        let r = classified(3, 3, &values);
        let voted = majority_vote(&r, 1).unwrap();
        assert_eq!(voted.get(0, 0).unwrap(), 1);
    }

    #[test]
    fn test_sieve_removes_small_clusters() {
        let mut values = vec![1u8; 36];
        // 2-cell cluster of class 5
        values[14] = 5;
        values[15] = 5;
        let r = classified(6, 6, &values);
        let sieved = sieve(&r, 3).unwrap();
        assert_eq!(sieved.get(2, 2).unwrap(), 255);
        assert_eq!(sieved.get(2, 3).unwrap(), 255);
        // The big background cluster survives
        assert_eq!(sieved.get(0, 0).unwrap(), 1);
    }

    #[test]
    fn test_sieve_requires_nodata() {
        let mut r = classified(3, 3, &[1u8; 9]);
        r.set_nodata(None);
        assert!(sieve(&r, 2).is_err());
    }

    #[test]
    fn test_denoise_composition() {
        let n = 255u8;
        #[rustfmt::skip]
        let values = vec![
            2, 2, 2, 2, 2,
            2, 2, 7, n, 2,
            2, n, n, n, 2,
            2, 2, n, 2, 2,
            2, 2, 2, 2, 2,
        ];
        let r = classified(5, 5, &values);
        let clean = denoise(&r).unwrap();
        for row in 0..5 {
            for col in 0..5 {
                assert_eq!(clean.get(row, col).unwrap(), 2, "cell ({row},{col})");
            }
        }
    }
}
