use num::Float;

/// Returns `TargetError::NonFinite` from the enclosing function when a flat `[rows, 4]` host
/// buffer holds a NaN or an infinity. The reported row is the first offending box.
#[macro_export]
macro_rules! ensure_finite {
    ($values:expr, $what:expr) => {{
        if let Some(pos) = $values.iter().position(|v: &f32| !v.is_finite()) {
            return Err($crate::error::TargetError::NonFinite {
                what: $what,
                row: pos / 4,
            });
        }
    }};
}

// Helper function for comparing floats
pub fn assert_approx_eq<F>(a: &F, b: &F, epsilon: F)
where
    F: Float + std::fmt::Display + std::fmt::Debug,
{
    assert!(
        (*a - *b).abs() <= epsilon,
        "Values differ: {:?} vs {:?} (tolerance: {:?})",
        *a,
        *b,
        epsilon
    );
}
