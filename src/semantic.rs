/// Converts a raw vector distance into a similarity of at least 0: `max(0, 1 - distance)`,
/// with a NaN distance mapping to 0. Negative distances are not clamped from above.
pub fn similarity_from_distance(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).max(0.0)
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        let l = f64::from(*left_value);
        let r = f64::from(*right_value);
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }

    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    1.0 - cosine_similarity(left, right)
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let mut out = Vec::<f32>::with_capacity(expected_dim);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    if out.len() == expected_dim {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_one_minus_distance_inside_unit_interval() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(1.0), 0.0);
        assert!((similarity_from_distance(0.25) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn similarity_clamps_large_and_undefined_distances() {
        assert_eq!(similarity_from_distance(1.5), 0.0);
        assert_eq!(similarity_from_distance(2.0), 0.0);
        assert_eq!(similarity_from_distance(f64::NAN), 0.0);
        assert_eq!(similarity_from_distance(f64::INFINITY), 0.0);
    }

    #[test]
    fn negative_distance_is_not_clamped_from_above() {
        // Cosine distance can dip below zero through float rounding.
        assert!(similarity_from_distance(-1e-9) > 1.0);
    }

    #[test]
    fn cosine_distance_covers_identical_and_opposite_vectors() {
        let a = [1.0_f32, 0.0, 0.0];
        let b = [-1.0_f32, 0.0, 0.0];
        assert!(cosine_distance(&a, &a).abs() < 1e-12);
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn embedding_blob_round_trips_and_rejects_wrong_dimension() {
        let values = vec![0.5_f32, -1.25, 3.0];
        let blob = encode_embedding_blob(&values);
        assert_eq!(decode_embedding_blob(&blob, 3), Some(values));
        assert_eq!(decode_embedding_blob(&blob, 4), None);
        assert_eq!(decode_embedding_blob(&[], 0), None);
    }
}
