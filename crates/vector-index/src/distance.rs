use crate::config::Metric;

/// Scales `vec` to unit L2 norm in place. Zero vectors are left untouched.
pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

/// Returns the vector as the engines expect to see it for `metric`.
#[must_use]
pub fn prepared(metric: Metric, vector: &[f32]) -> Vec<f32> {
    let mut out = vector.to_vec();
    if metric.normalizes() {
        normalize(&mut out);
    }
    out
}

#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Distance between two prepared vectors. Lower is better for every metric.
#[must_use]
pub fn distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::L2 => squared_l2(a, b),
        Metric::InnerProduct => -dot(a, b),
        Metric::Cosine => 1.0 - dot(a, b),
    }
}

/// Converts a raw inner product into the distance convention of `metric`.
#[must_use]
pub fn from_inner_product(metric: Metric, ip: f32) -> f32 {
    match metric {
        Metric::Cosine => 1.0 - ip,
        _ => -ip,
    }
}
