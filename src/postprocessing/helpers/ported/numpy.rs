/* PORTED NUMPY FUNCTIONS */

/// Location of the maximum element, or `None` for an empty slice.
/// Ties resolve to the first occurrence, as `numpy.argmax` does.
pub fn arg_max(arr: &[f32]) -> Option<usize> {
    arr.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, best_v)) if v <= best_v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Row and column of every element of `arr2d` greater than `threshold`, in row-major order.
pub fn where_greater_than_axis1(arr2d: &[Vec<f32>], threshold: f32) -> (Vec<usize>, Vec<usize>) {
    arr2d
        .iter()
        .enumerate()
        .flat_map(|(i, row)| {
            row.iter()
                .enumerate()
                .filter(move |(_, &value)| value > threshold)
                .map(move |(j, _)| (i, j))
        })
        .unzip()
}

/// Global maximum of a 2D array (0.0 when empty), equivalent to `numpy.max` on activations.
pub fn global_max(array: &[Vec<f32>]) -> f32 {
    array.iter().flatten().fold(0.0f32, |acc, &v| acc.max(v))
}

/// Element-wise reduction over the first axis of a stack of equally shaped 2D arrays.
fn reduce_axis0(array: &[Vec<Vec<f32>>], op: fn(f32, f32) -> f32) -> Vec<Vec<f32>> {
    let Some((first, rest)) = array.split_first() else {
        return Vec::new();
    };
    rest.iter().fold(first.clone(), |mut acc, layer| {
        for (acc_row, row) in acc.iter_mut().zip(layer) {
            for (a, &v) in acc_row.iter_mut().zip(row) {
                *a = op(*a, v);
            }
        }
        acc
    })
}

/// Minimum over axis 0 of a 3D array.
pub fn min_3d_for_axis0(array: &[Vec<Vec<f32>>]) -> Vec<Vec<f32>> {
    reduce_axis0(array, f32::min)
}

/// Maximum over axis 0 of a 3D array.
pub fn max_3d_for_axis0(array: &[Vec<Vec<f32>>]) -> Vec<Vec<f32>> {
    reduce_axis0(array, f32::max)
}

/// Relative maxima along axis 0 with clipped edges, as `scipy.signal.argrelmax`.
///
/// An element is a maximum when it is strictly greater than every neighbour
/// within `order` rows. Results are `(row, col)` pairs ordered column-major.
pub fn arg_rel_max(array: &[Vec<f32>], order: usize) -> Vec<(usize, usize)> {
    let n_rows = array.len();
    let n_cols = array.first().map_or(0, Vec::len);

    (0..n_cols)
        .flat_map(|col| (0..n_rows).map(move |row| (row, col)))
        .filter(|&(row, col)| {
            let lo = row.saturating_sub(order);
            let hi = (row + order).min(n_rows - 1);
            (lo..=hi).all(|other| other == row || array[row][col] > array[other][col])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_max_first_wins() {
        assert_eq!(arg_max(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(arg_max(&[]), None);
    }

    #[test]
    fn test_where_greater_than() {
        let arr = vec![vec![0.1, 0.9], vec![0.6, 0.2]];
        let (rows, cols) = where_greater_than_axis1(&arr, 0.5);
        assert_eq!(rows, vec![0, 1]);
        assert_eq!(cols, vec![1, 0]);
    }

    #[test]
    fn test_arg_rel_max_column_major() {
        let arr = vec![vec![0.0, 1.0], vec![2.0, 0.0], vec![0.0, 0.0], vec![0.0, 3.0]];
        assert_eq!(arg_rel_max(&arr, 1), vec![(1, 0), (0, 1), (3, 1)]);
    }

    #[test]
    fn test_axis0_reductions() {
        let stack = vec![vec![vec![1.0, 5.0]], vec![vec![3.0, 2.0]]];
        assert_eq!(min_3d_for_axis0(&stack), vec![vec![1.0, 2.0]]);
        assert_eq!(max_3d_for_axis0(&stack), vec![vec![3.0, 5.0]]);
    }
}
