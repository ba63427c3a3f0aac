//! Conversion between native arrays and the flat wire encoding.
//!
//! A variable travels as a dimension list plus a flat data list:
//!
//! | rank | native type    | dimensions     | flat order            |
//! |------|----------------|----------------|-----------------------|
//! | 0    | `T`            | `[]`           | single element        |
//! | 1    | `Vec<T>`       | `[len]`        | as is                 |
//! | 2    | `Vec<Vec<T>>`  | `[dim0, dim1]` | column-major          |
//!
//! Rank-2 data is stored column-major to match the memory layout of the
//! Fortran/LAPACK routines running in the kernel: element `(i, j)` of a
//! `dim0 x dim1` matrix lives at flat index `j * dim0 + i`. Rank 1 is not
//! transposed. This asymmetry is part of the wire contract.
//!
//! The legacy named-variable RPCs encode scalars as `[1]` instead of `[]`;
//! see [`Flattened::with_unit_scalar`] and [`normalize_unit_scalar`].

use crate::protocol::Element;
use thiserror::Error;

/// Failures raised while flattening or unflattening.
///
/// These carry no variable context; the client attaches the operation and
/// variable name when converting to [`crate::RemoteError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("cannot send empty array")]
    Empty,

    #[error("cannot send empty array: row {row} is empty")]
    EmptyRow { row: usize },

    #[error("cannot send jagged array: row {row} has {actual} elements, expected {expected}")]
    Jagged {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("dimension {len} does not fit the wire format")]
    TooLarge { len: usize },

    #[error("expected rank {expected_rank}, got dimensions {dimensions:?} with {elements} elements")]
    ShapeMismatch {
        expected_rank: usize,
        dimensions: Vec<u32>,
        elements: usize,
    },
}

impl MarshalError {
    /// True for failures in data received from the kernel, false for
    /// failures in data the caller tried to send.
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, MarshalError::ShapeMismatch { .. })
    }
}

/// Dimension list plus flat data, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Flattened<T> {
    pub dimensions: Vec<u32>,
    pub data: Vec<T>,
}

impl<T> Flattened<T> {
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Re-encode a scalar as `[1]` for the legacy named-variable RPCs.
    pub fn with_unit_scalar(mut self) -> Self {
        if self.dimensions.is_empty() {
            self.dimensions.push(1);
        }
        self
    }
}

/// Product of the dimensions, or `None` on overflow.
pub fn element_count(dimensions: &[u32]) -> Option<usize> {
    dimensions
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
}

/// Flat index of element `(i, j)` in a column-major matrix with `dim0` rows.
pub fn column_major_index(i: usize, j: usize, dim0: usize) -> usize {
    j * dim0 + i
}

/// Map a legacy `[1]` scalar encoding back to `[]` when a scalar is expected.
pub fn normalize_unit_scalar(dimensions: Vec<u32>, expected_rank: usize) -> Vec<u32> {
    if expected_rank == 0 && dimensions == [1] {
        Vec::new()
    } else {
        dimensions
    }
}

fn wire_len(len: usize) -> Result<u32, MarshalError> {
    u32::try_from(len).map_err(|_| MarshalError::TooLarge { len })
}

// A zero dimension is never valid: every variable holds at least one element.
fn check_shape<T>(
    dimensions: &[u32],
    data: &[T],
    expected_rank: usize,
) -> Result<(), MarshalError> {
    let matches = dimensions.len() == expected_rank
        && !dimensions.contains(&0)
        && element_count(dimensions) == Some(data.len());
    if matches {
        Ok(())
    } else {
        Err(MarshalError::ShapeMismatch {
            expected_rank,
            dimensions: dimensions.to_vec(),
            elements: data.len(),
        })
    }
}

/// A scalar is one element with no dimensions.
pub fn flatten_scalar<T: Element>(value: T) -> Flattened<T> {
    Flattened {
        dimensions: Vec::new(),
        data: vec![value],
    }
}

/// Flatten a non-empty vector; its length is the only dimension.
pub fn flatten_vector<T: Element>(values: &[T]) -> Result<Flattened<T>, MarshalError> {
    if values.is_empty() {
        return Err(MarshalError::Empty);
    }
    Ok(Flattened {
        dimensions: vec![wire_len(values.len())?],
        data: values.to_vec(),
    })
}

/// Flatten a matrix given as rows into column-major order.
pub fn flatten_matrix<T: Element>(rows: &[Vec<T>]) -> Result<Flattened<T>, MarshalError> {
    if rows.is_empty() {
        return Err(MarshalError::Empty);
    }

    let dim0 = rows.len();
    let dim1 = rows[0].len();
    for (row, values) in rows.iter().enumerate() {
        if values.is_empty() {
            return Err(MarshalError::EmptyRow { row });
        }
        if values.len() != dim1 {
            return Err(MarshalError::Jagged {
                row,
                expected: dim1,
                actual: values.len(),
            });
        }
    }

    let mut data = Vec::with_capacity(dim0 * dim1);
    for j in 0..dim1 {
        for row in rows {
            data.push(row[j]);
        }
    }

    Ok(Flattened {
        dimensions: vec![wire_len(dim0)?, wire_len(dim1)?],
        data,
    })
}

/// Take the single element of a rank-0 reply.
pub fn unflatten_scalar<T: Element>(dimensions: &[u32], data: Vec<T>) -> Result<T, MarshalError> {
    check_shape(dimensions, &data, 0)?;
    Ok(data[0])
}

/// Check a rank-1 reply against its data and return the data as is.
pub fn unflatten_vector<T: Element>(
    dimensions: &[u32],
    data: Vec<T>,
) -> Result<Vec<T>, MarshalError> {
    check_shape(dimensions, &data, 1)?;
    Ok(data)
}

/// Rebuild rows from column-major flat data.
pub fn unflatten_matrix<T: Element>(
    dimensions: &[u32],
    data: Vec<T>,
) -> Result<Vec<Vec<T>>, MarshalError> {
    check_shape(dimensions, &data, 2)?;
    let dim0 = dimensions[0] as usize;
    let dim1 = dimensions[1] as usize;

    Ok((0..dim0)
        .map(|i| {
            (0..dim1)
                .map(|j| data[column_major_index(i, j, dim0)])
                .collect()
        })
        .collect())
}

/// A native value that maps onto one kernel variable.
///
/// Implemented for `T`, `Vec<T>` and `Vec<Vec<T>>` for every [`Element`]
/// type, so one generic send/recv path covers all nine type/rank pairs.
pub trait Marshal: Sized {
    type Elem: Element;
    const RANK: usize;

    fn flatten(&self) -> Result<Flattened<Self::Elem>, MarshalError>;

    fn unflatten(dimensions: &[u32], data: Vec<Self::Elem>) -> Result<Self, MarshalError>;
}

macro_rules! impl_marshal {
    ($($t:ty),*) => {$(
        impl Marshal for $t {
            type Elem = $t;
            const RANK: usize = 0;

            fn flatten(&self) -> Result<Flattened<$t>, MarshalError> {
                Ok(flatten_scalar(*self))
            }

            fn unflatten(dimensions: &[u32], data: Vec<$t>) -> Result<Self, MarshalError> {
                unflatten_scalar(dimensions, data)
            }
        }

        impl Marshal for Vec<$t> {
            type Elem = $t;
            const RANK: usize = 1;

            fn flatten(&self) -> Result<Flattened<$t>, MarshalError> {
                flatten_vector(self)
            }

            fn unflatten(dimensions: &[u32], data: Vec<$t>) -> Result<Self, MarshalError> {
                unflatten_vector(dimensions, data)
            }
        }

        impl Marshal for Vec<Vec<$t>> {
            type Elem = $t;
            const RANK: usize = 2;

            fn flatten(&self) -> Result<Flattened<$t>, MarshalError> {
                flatten_matrix(self)
            }

            fn unflatten(dimensions: &[u32], data: Vec<$t>) -> Result<Self, MarshalError> {
                unflatten_matrix(dimensions, data)
            }
        }
    )*};
}

impl_marshal!(i32, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<M: Marshal + PartialEq + std::fmt::Debug>(value: M) {
        let flat = value.flatten().unwrap();
        assert_eq!(flat.rank(), M::RANK);
        let back = M::unflatten(&flat.dimensions, flat.data).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_matrix_is_column_major() {
        let flat = flatten_matrix(&[vec![1, 2], vec![3, 4]]).unwrap();
        assert_eq!(flat.dimensions, vec![2, 2]);
        assert_eq!(flat.data, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_unflatten_column_major_matrix() {
        let rows = unflatten_matrix(&[2, 2], vec![1.0, 3.0, 2.0, 4.0]).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_non_square_matrix_layout() {
        // 2 x 3: [[1,2,3],[4,5,6]] -> columns (1,4) (2,5) (3,6)
        let rows = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let flat = flatten_matrix(&rows).unwrap();
        assert_eq!(flat.dimensions, vec![2, 3]);
        assert_eq!(flat.data, vec![1, 4, 2, 5, 3, 6]);
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                assert_eq!(flat.data[column_major_index(i, j, 2)], *value);
            }
        }
    }

    #[test]
    fn test_vector_is_not_transposed() {
        let flat = flatten_vector(&[5.0f32, 6.0, 7.0]).unwrap();
        assert_eq!(flat.dimensions, vec![3]);
        assert_eq!(flat.data, vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_scalar_has_no_dimensions() {
        let flat = 42.0f64.flatten().unwrap();
        assert!(flat.dimensions.is_empty());
        assert_eq!(flat.data, vec![42.0]);
        assert_eq!(flat.with_unit_scalar().dimensions, vec![1]);
    }

    #[test]
    fn test_roundtrip_all_types_and_ranks() {
        roundtrip(7i32);
        roundtrip(-1.5f32);
        roundtrip(std::f64::consts::PI);
        roundtrip(vec![1i32, -2, 3]);
        roundtrip(vec![0.25f32]);
        roundtrip(vec![1.0f64, 2.0]);
        roundtrip(vec![vec![1i32, 2, 3], vec![4, 5, 6]]);
        roundtrip(vec![vec![1.0f32], vec![2.0], vec![3.0]]);
        roundtrip(vec![vec![1.0f64, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_jagged_matrix_rejected() {
        let err = flatten_matrix(&[vec![1, 2], vec![3]]).unwrap_err();
        assert_eq!(
            err,
            MarshalError::Jagged {
                row: 1,
                expected: 2,
                actual: 1
            }
        );
        assert!(!err.is_shape_mismatch());
    }

    #[test]
    fn test_empty_inputs_rejected() {
        assert_eq!(flatten_vector::<f64>(&[]).unwrap_err(), MarshalError::Empty);
        assert_eq!(flatten_matrix::<f64>(&[]).unwrap_err(), MarshalError::Empty);
        assert_eq!(
            flatten_matrix::<i32>(&[vec![]]).unwrap_err(),
            MarshalError::EmptyRow { row: 0 }
        );
        assert_eq!(
            flatten_matrix(&[vec![1], vec![]]).unwrap_err(),
            MarshalError::EmptyRow { row: 1 }
        );
    }

    #[test]
    fn test_scalar_with_two_elements_is_shape_mismatch() {
        let err = unflatten_scalar::<f64>(&[], vec![1.0, 2.0]).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_rank_mismatch_reports_received_dimensions() {
        let err = <Vec<Vec<f64>>>::unflatten(&[4], vec![1.0, 2.0, 3.0, 4.0]).unwrap_err();
        assert_eq!(
            err,
            MarshalError::ShapeMismatch {
                expected_rank: 2,
                dimensions: vec![4],
                elements: 4
            }
        );
    }

    #[test]
    fn test_element_count_mismatch() {
        assert!(unflatten_vector::<i32>(&[3], vec![1, 2]).is_err());
        assert!(unflatten_matrix::<i32>(&[2, 2], vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_element_count_overflow() {
        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(element_count(&[2, 3]), Some(6));
        let huge = [u32::MAX, u32::MAX, u32::MAX];
        if usize::BITS <= 64 {
            assert_eq!(element_count(&huge), None);
        }
    }

    #[test]
    fn test_zero_dimension_is_shape_mismatch() {
        // Element count is 0 and matches the empty data, but no rows may be built
        let err = unflatten_matrix::<f64>(&[u32::MAX, 0], vec![]).unwrap_err();
        assert!(err.is_shape_mismatch());
        assert!(unflatten_matrix::<i32>(&[0, 3], vec![]).is_err());
        assert!(unflatten_vector::<f32>(&[0], vec![]).is_err());
    }

    #[test]
    fn test_normalize_unit_scalar() {
        assert!(normalize_unit_scalar(vec![1], 0).is_empty());
        assert_eq!(normalize_unit_scalar(vec![1], 1), vec![1]);
        assert_eq!(normalize_unit_scalar(vec![2], 0), vec![2]);
    }
}
