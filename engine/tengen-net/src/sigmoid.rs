//! Score-conditioned win probability.
//!
//! The SAI value head outputs parameters `(alpha, beta, beta2)` of a
//! sigmoid in the score bonus rather than a direct winrate. `beta2`, when
//! non-negative, is an asymmetric sharpness used on the winning side of
//! the curve.

/// Evaluate `sigma(beta' * (alpha + bonus))` and return `(p, 1 - p)`.
///
/// `beta'` is `beta2` when `beta2 >= 0` and `alpha + bonus > 0`, otherwise
/// `beta`. The computation saturates explicitly past `|arg| > 30` so the
/// result never degenerates to NaN for extreme score advantages.
pub fn sigmoid(alpha: f32, beta: f32, bonus: f32, beta2: f32) -> (f32, f32) {
    let beta2 = if beta2 < 0.0 { beta } else { beta2 };
    let x = alpha + bonus;
    let slope = if x > 0.0 { beta2 } else { beta };
    let arg = f64::from(slope) * f64::from(x);
    let absarg = arg.abs();
    let ret = if absarg > 30.0 {
        (-absarg).exp()
    } else {
        1.0 / (1.0 + absarg.exp())
    };

    if arg < 0.0 {
        (ret as f32, (1.0 - ret) as f32)
    } else {
        ((1.0 - ret) as f32, ret as f32)
    }
}
