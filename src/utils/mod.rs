//! Utility functions and helpers

pub mod formats;

pub use formats::{icrs_to_sprs, reference_matvec, triples_to_sprs};

/// Computes an exclusive prefix sum (scan) for a slice of counts
///
/// The result has one more element than the input; the last element is the
/// total.
pub fn exclusive_scan(input: &[usize]) -> Vec<usize> {
    let mut result = Vec::with_capacity(input.len() + 1);
    let mut sum = 0;

    result.push(0);

    for &val in input {
        sum += val;
        result.push(sum);
    }

    result
}

/// `ceil(a / b)` for `b > 0`
pub fn ceil_div(a: usize, b: usize) -> usize {
    debug_assert!(b > 0, "division by zero");
    if a % b == 0 {
        a / b
    } else {
        a / b + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_scan() {
        let input = vec![1, 2, 3, 4];
        let expected = vec![0, 1, 3, 6, 10];
        assert_eq!(exclusive_scan(&input), expected);

        let input = vec![0, 0, 5, 0];
        let expected = vec![0, 0, 0, 5, 5];
        assert_eq!(exclusive_scan(&input), expected);

        assert_eq!(exclusive_scan(&[]), vec![0]);
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(0, 3), 0);
        assert_eq!(ceil_div(9, 3), 3);
        assert_eq!(ceil_div(10, 3), 4);
        assert_eq!(ceil_div(1, 4), 1);
    }
}
