use std::fmt;

use log::{debug, warn};
use ort::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch};

use crate::config::DevicePreference;

/// The compute resource a pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device
{
    Cpu,
    Cuda { device_id: i32 },
}

impl Device
{
    /// Execution providers for the session, in priority order.
    /// Registering CUDA must succeed, otherwise ONNX Runtime would quietly run on the CPU.
    /// The CPU provider still comes last so operators CUDA lacks can run there.
    pub fn execution_providers(&self) -> Vec<ExecutionProviderDispatch>
    {
        match self {
            Device::Cpu => vec![CPUExecutionProvider::default().build()],
            Device::Cuda { device_id } => vec![
                CUDAExecutionProvider::default().with_device_id(*device_id).build().error_on_failure(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

impl fmt::Display for Device
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda { device_id } => write!(f, "cuda:{}", device_id),
        }
    }
}

/// Whether the ONNX Runtime build ships the CUDA provider. Always false unless built with the `cuda` feature.
/// This does not prove a GPU is present; that only shows when the provider is registered.
pub fn cuda_available() -> bool
{
    if !cfg!(feature = "cuda") {
        return false;
    }

    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            warn!("Error querying CUDA availability: {:?}", e);
            false
        }
    }
}

pub fn select(preference: DevicePreference) -> anyhow::Result<Device>
{
    select_with(preference, cuda_available)
}

fn select_with(preference: DevicePreference, cuda_available: impl Fn() -> bool) -> anyhow::Result<Device>
{
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Auto => {
            if cuda_available() { Device::Cuda { device_id: 0 } } else { Device::Cpu }
        },
        DevicePreference::Cuda => {
            if !cuda_available() {
                anyhow::bail!("CUDA was requested but no CUDA device is available");
            }
            Device::Cuda { device_id: 0 }
        },
    };
    debug!("Selected device {} for preference {:?}", device, preference);
    Ok(device)
}

/// Builds something on `device`; if CUDA was only picked by `auto` and fails, retries on the CPU.
/// Returns the device the build actually succeeded on.
pub fn commit_with_fallback<T, F>(preference: DevicePreference, device: Device, mut commit: F) -> anyhow::Result<(T, Device)>
where
    F: FnMut(Device) -> anyhow::Result<T>,
{
    match commit(device) {
        Ok(value) => Ok((value, device)),
        Err(e) if device != Device::Cpu && preference == DevicePreference::Auto => {
            warn!("Could not use {}, falling back to cpu: {:#}", device, e);
            Ok((commit(Device::Cpu)?, Device::Cpu))
        },
        Err(e) => Err(e.context(format!("could not use {}", device))),
    }
}
