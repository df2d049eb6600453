//! Vector operations for embeddings.

use crate::{Error, Result};

pub type Vector = Vec<f32>;

pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale to unit length. A zero vector is returned unchanged.
pub fn normalize_vector(v: &[f32]) -> Vector {
    let mag = magnitude(v);
    if mag == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / mag).collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::invalid_input(format!(
            "Vector dimensions must match: {} != {}",
            a.len(),
            b.len()
        )));
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a == 0.0 || mag_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (mag_a * mag_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn normalize_gives_unit_length() {
        let normalized = normalize_vector(&[3.0, 4.0]);
        assert!(approx_eq(normalized[0], 0.6));
        assert!(approx_eq(normalized[1], 0.8));
        assert!(approx_eq(magnitude(&normalized), 1.0));
    }

    #[test]
    fn zero_vector_is_left_alone() {
        let v = vec![0.0, 0.0, 0.0];
        assert_eq!(normalize_vector(&v), v);
        assert!(approx_eq(cosine_similarity(&v, &[1.0, 0.0, 0.0]).unwrap(), 0.0));
    }

    #[test]
    fn cosine_of_identical_and_opposite() {
        let a = [1.0, 2.0, 3.0];
        assert!(approx_eq(cosine_similarity(&a, &a).unwrap(), 1.0));
        assert!(approx_eq(cosine_similarity(&a, &[-1.0, -2.0, -3.0]).unwrap(), -1.0));
    }

    #[test]
    fn dimension_mismatch_is_invalid_input() {
        assert!(matches!(
            cosine_similarity(&[1.0], &[1.0, 2.0]),
            Err(Error::InvalidInput { .. })
        ));
    }
}
