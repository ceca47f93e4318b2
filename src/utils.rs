/// Utility functions
use candle_core::{Device, Result};
use candle_nn::VarMap;

/// CUDA device 0 when available and not disabled, CPU otherwise
pub fn select_device(force_cpu: bool) -> Result<Device> {
    if !force_cpu && candle_core::utils::cuda_is_available() {
        Device::new_cuda(0)
    } else {
        Ok(Device::Cpu)
    }
}

/// Total number of scalar parameters held by `varmap`
pub fn count_parameters(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}
