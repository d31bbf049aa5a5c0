//! This is the vector math module
//! Provide squared L2 distance, dimension checks and L2 normalization

use crate::error::{IndexError, Result};

/// Fail with `DimensionMismatch` unless `vector` has exactly `expected` components.
pub fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Squared Euclidean distance
/// dist = sum((a[i] - b[i])^2) for i = 0..a.len()
/// Can only process vectors with same dimensions
pub fn squared_l2(left: &[f32], right: &[f32]) -> Result<f32> {
    check_dimension(right, left.len())?;

    let dist = left.iter()
        .zip(right.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum();

    Ok(dist)
}

/// L2 Normalization
/// norm_vec = vec / ||vec||
/// Zero and empty vectors are returned unchanged
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();

    if norm == 0.0 {
        return;
    }

    for x in vector.iter_mut() {
        *x /= norm;
    }
}

#[cfg(test)]
mod vector_test {
    use super::*;

    // ========== Distance Tests ==========

    #[test]
    fn test_squared_l2_basic() {
        // (1-4)^2 + (2-6)^2 = 9 + 16 = 25
        let a = vec![1.0, 2.0];
        let b = vec![4.0, 6.0];
        let result = squared_l2(&a, &b).unwrap();

        assert!((result - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_squared_l2_to_self_is_zero() {
        let a = vec![0.3, -1.5, 2.25];
        assert_eq!(squared_l2(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_squared_l2_is_symmetric() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(squared_l2(&a, &b).unwrap(), squared_l2(&b, &a).unwrap());
        assert!((squared_l2(&a, &b).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_squared_l2_dimension_mismatch() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0];

        match squared_l2(&a, &b) {
            Err(IndexError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected DimensionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_squared_l2_empty_vectors() {
        let a: Vec<f32> = vec![];
        let b: Vec<f32> = vec![];
        assert_eq!(squared_l2(&a, &b).unwrap(), 0.0);
    }

    // ========== L2 Normalization Tests ==========

    #[test]
    fn test_l2_normalize_basic() {
        // ||[3,4]|| = 5
        let mut vector = vec![3.0, 4.0];
        l2_normalize(&mut vector);

        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert!((vector[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        let mut vector = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut vector);
        assert_eq!(vector, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(&[1.0, 2.0], 2).is_ok());
        assert!(check_dimension(&[1.0], 2).is_err());
    }
}
