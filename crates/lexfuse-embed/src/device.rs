use candle_core::Device;
use tracing::{info, warn};

use lexfuse_core::config::DeviceHint;

/// Resolve a configured device hint. Accelerators that fail to initialise
/// fall back to the CPU rather than failing model loading.
pub fn select_device(hint: DeviceHint) -> Device {
    let attempt = match hint {
        DeviceHint::Cpu => None,
        DeviceHint::Metal => Some(Device::new_metal(0)),
        DeviceHint::Cuda => Some(Device::new_cuda(0)),
        DeviceHint::Auto => auto_accelerator(),
    };
    match attempt {
        Some(Ok(device)) => {
            info!(device = ?device, "using accelerator");
            device
        }
        Some(Err(e)) => {
            warn!(error = %e, ?hint, "accelerator unavailable, falling back to CPU");
            Device::Cpu
        }
        None => {
            info!("using CPU");
            Device::Cpu
        }
    }
}

#[allow(unreachable_code)]
fn auto_accelerator() -> Option<candle_core::Result<Device>> {
    #[cfg(feature = "metal")]
    {
        return Some(Device::new_metal(0));
    }
    #[cfg(feature = "cuda")]
    {
        return Some(Device::new_cuda(0));
    }
    None
}
