/// Gradient norm clipping over a candle `GradStore`
use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Var};

/// Added to the norm before dividing so that a zero norm stays finite
const NORM_EPS: f64 = 1e-6;

/// Global L2 norm of the gradients of `vars`. Variables without a gradient are skipped.
pub fn global_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f64> {
    let mut sum_sq = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            sum_sq += grad
                .sqr()?
                .sum_all()?
                .to_dtype(DType::F64)?
                .to_scalar::<f64>()?;
        }
    }
    Ok(sum_sq.sqrt())
}

/// Rescale all gradients in place so their global L2 norm is at most `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let total_norm = global_grad_norm(grads, vars)?;
    let clip_coef = max_norm / (total_norm + NORM_EPS);

    if clip_coef < 1.0 {
        for var in vars {
            if let Some(grad) = grads.remove(var) {
                grads.insert(var, (grad * clip_coef)?);
            }
        }
    }

    Ok(total_norm)
}
