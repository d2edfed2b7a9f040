//! Hungarian (Kuhn-Munkres) algorithm for optimal assignment
//!
//! Shortest augmenting path formulation with row/column potentials, O(n² m)
//! for an `n x m` cost matrix. Rectangular matrices are supported in both
//! orientations. Use `f64::INFINITY` (or NaN) for impossible pairs: they are
//! never reported as assigned, and the solver maximizes the number of feasible
//! pairs before minimizing their total cost.

/// Minimum cost assignment of rows to columns.
///
/// Returns one entry per row: the assigned column, or `None` if the row has
/// no feasible partner.
pub fn solve(costs: &[Vec<f64>]) -> Vec<Option<usize>> {
    let rows = costs.len();
    let cols = costs.first().map_or(0, Vec::len);
    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }

    let feasible = |c: f64| c.is_finite();

    // Infeasible entries become a penalty larger than any feasible assignment
    let max_finite = costs
        .iter()
        .flatten()
        .copied()
        .filter(|&c| feasible(c))
        .fold(0.0f64, |acc, c| acc.max(c.abs()));
    let penalty = (max_finite + 1.0) * (rows.max(cols) as f64 + 1.0);
    let entry = |r: usize, c: usize| {
        let v = costs[r].get(c).copied().unwrap_or(f64::INFINITY);
        if feasible(v) {
            v
        } else {
            penalty
        }
    };

    let assignment = if rows <= cols {
        shortest_augmenting_path(rows, cols, entry)
    } else {
        // Solve the transpose and invert the mapping
        let by_col = shortest_augmenting_path(cols, rows, |c, r| entry(r, c));
        let mut by_row = vec![None; rows];
        for (c, r) in by_col.into_iter().enumerate() {
            if let Some(r) = r {
                by_row[r] = Some(c);
            }
        }
        by_row
    };

    assignment
        .into_iter()
        .enumerate()
        .map(|(r, c)| c.filter(|&c| feasible(costs[r].get(c).copied().unwrap_or(f64::INFINITY))))
        .collect()
}

/// Core solver for `n <= m`; every row receives a column.
fn shortest_augmenting_path<F>(n: usize, m: usize, cost: F) -> Vec<Option<usize>>
where
    F: Fn(usize, usize) -> f64,
{
    // 1-based indexing, column 0 is the virtual source
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut matched_row = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        matched_row[0] = i;
        let mut j0 = 0usize;
        let mut min_slack = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = matched_row[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let reduced = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if reduced < min_slack[j] {
                    min_slack[j] = reduced;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[matched_row[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }

            j0 = j1;
            if matched_row[j0] == 0 {
                break;
            }
        }

        // Flip the augmenting path
        loop {
            let j1 = way[j0];
            matched_row[j0] = matched_row[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![None; n];
    for j in 1..=m {
        if matched_row[j] != 0 {
            assignment[matched_row[j] - 1] = Some(j - 1);
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    const INF: f64 = f64::INFINITY;

    fn total(costs: &[Vec<f64>], assignment: &[Option<usize>]) -> f64 {
        assignment
            .iter()
            .enumerate()
            .filter_map(|(r, c)| c.map(|c| costs[r][c]))
            .sum()
    }

    #[test]
    fn test_square_optimal() {
        let costs = vec![vec![4.0, 1.0, 3.0], vec![2.0, 0.0, 5.0], vec![3.0, 2.0, 2.0]];
        let assignment = solve(&costs);
        assert_eq!(total(&costs, &assignment), 5.0);
        assert_eq!(assignment, vec![Some(1), Some(0), Some(2)]);
    }

    #[test]
    fn test_greedy_would_be_suboptimal() {
        // Greedy picks (0,0)=1 and is then forced into (1,1)=10
        let costs = vec![vec![1.0, 2.0], vec![2.0, 10.0]];
        let assignment = solve(&costs);
        assert_eq!(assignment, vec![Some(1), Some(0)]);
    }

    #[test]
    fn test_more_rows_than_columns() {
        let costs = vec![vec![5.0], vec![1.0], vec![3.0]];
        assert_eq!(solve(&costs), vec![None, Some(0), None]);
    }

    #[test]
    fn test_more_columns_than_rows() {
        let costs = vec![vec![5.0, 1.0, 3.0]];
        assert_eq!(solve(&costs), vec![Some(1)]);
    }

    #[test]
    fn test_infinite_pairs_never_assigned() {
        let costs = vec![vec![INF, INF], vec![1.0, INF]];
        assert_eq!(solve(&costs), vec![None, Some(0)]);
    }

    #[test]
    fn test_feasible_pairs_are_maximized() {
        // Row 0 would prefer column 0 but that leaves row 1 unmatched
        let costs = vec![vec![1.0, 50.0], vec![2.0, INF]];
        assert_eq!(solve(&costs), vec![Some(1), Some(0)]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(solve(&[]).is_empty());
        assert_eq!(solve(&[vec![], vec![]]), vec![None, None]);
    }
}
