use log::debug;

use crate::prelude::*;

/// Derives the Kirchhoff tie matrix `tv` and cutset matrix `ti` from a
/// signed net-branch incidence matrix.
///
/// Columns that receive a pivot during elimination are the tree
/// branches; the rest are links. `ti` is the row-echelon cutset basis
/// (current law), `tv` the complementary tie basis (voltage law), with
/// `tv * transpose(ti) = 0` and `rows(tv) + rows(ti)` equal to the
/// branch count.
///
/// The incidence contract (every entry +1 or -1, every column summing
/// to zero) is checked during elimination; a violation means a branch
/// ended up in more or fewer than two nets and is reported as an error.
pub fn topomat(incidence: &SparseMat<i32>) -> Result<(SparseMat<i32>, SparseMat<i32>)> {
    let mut a = incidence.clone();
    let ncols = a.ncols();
    let mut tree = vec![false; ncols];
    let mut row = 0;

    for col in 0..ncols {
        let candidates: Vec<(usize, i32)> = a
            .col_nonzeros(col)
            .into_iter()
            .filter(|&(r, _)| r >= row)
            .collect();
        if candidates.len() > 2 {
            return Err(Error::BranchInTooManyNets { branch: col });
        }
        let Some(&(pivot, pivot_value)) = candidates.first() else {
            continue;
        };
        if pivot_value.abs() != 1 {
            return Err(Error::NonUnitIncidence {
                net: pivot,
                branch: col,
                value: pivot_value,
            });
        }
        tree[col] = true;
        if pivot != row {
            a.row_swap(pivot, row);
        }
        if let Some(&(other, other_value)) = candidates.get(1) {
            if pivot_value + other_value != 0 {
                return Err(Error::UnbalancedBranch {
                    branch: col,
                    sum: pivot_value + other_value,
                });
            }
            a.row_add(other, row);
        }
        if a.get(row, col) < 0 {
            a.row_neg(row);
        }
        for r in 0..row {
            match a.get(r, col) {
                0 => {}
                1 => a.row_sub(r, row),
                -1 => a.row_add(r, row),
                value => {
                    return Err(Error::NonUnitIncidence {
                        net: r,
                        branch: col,
                        value,
                    });
                }
            }
        }
        row += 1;
    }

    let ti = a.top_rows(row);
    let tree_cols: Vec<usize> = (0..ncols).filter(|&c| tree[c]).collect();
    let link_cols: Vec<usize> = (0..ncols).filter(|&c| !tree[c]).collect();
    debug!(
        "topology reduction: {} tree branches, {} links",
        tree_cols.len(),
        link_cols.len()
    );

    // tv = [-dl' | I] spread over tree and link columns.
    let dl = ti.select_cols(&link_cols);
    let mut triplets = Vec::new();
    for Triplet { row: r, col: link, val } in dl.triplets() {
        triplets.push(Triplet::new(link, tree_cols[r], -val));
    }
    for (link, &col) in link_cols.iter().enumerate() {
        triplets.push(Triplet::new(link, col, 1));
    }
    let tv = SparseMat::from_triplets(link_cols.len(), ncols, &triplets);

    Ok((tv, ti))
}
