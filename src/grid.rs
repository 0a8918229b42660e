//! 1次元の点列と2次元グリッドの相互変換。

use ndarray::Array2;
use std::ops::Range;

/// 有効な線形インデックスに値を書き込み、残りを NaN で埋めた2次元グリッドを返します。
///
/// インデックスは行優先（row-major）の並びです。
pub fn data_arrange(values: &[f64], valid_idx: &[usize], shape: (usize, usize)) -> Array2<f64> {
    debug_assert_eq!(values.len(), valid_idx.len());
    let (_, cols) = shape;
    let mut grid = Array2::from_elem(shape, f64::NAN);
    for (&idx, &val) in valid_idx.iter().zip(values) {
        grid[[idx / cols, idx % cols]] = val;
    }
    grid
}

/// `data_arrange` の逆。指定したインデックスの値を取り出します。
pub fn gather(grid: &Array2<f64>, valid_idx: &[usize]) -> Vec<f64> {
    let cols = grid.ncols();
    valid_idx.iter().map(|&idx| grid[[idx / cols, idx % cols]]).collect()
}

/// `n` 個の点を `parts` 個の連続区間に分けます。
///
/// 先頭の `n % parts` 個の区間が1つずつ長くなります。空の区間は含めません。
pub fn split_ranges(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = n / parts;
    let extra = n % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        if len > 0 {
            ranges.push(start..start + len);
        }
        start += len;
    }
    ranges
}
