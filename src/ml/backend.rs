// ============================================================
// Layer 5 — Backend Selection
// ============================================================
// Maps the requested device onto a compiled-in burn backend.
//
//   cpu  → Autodiff<NdArray>           (always available)
//   wgpu → Autodiff<Wgpu>              (needs the `wgpu` feature)
//
// Requesting an accelerator that was not compiled in is a
// DeviceError; the run falls back to the CPU with a warning.

use serde::{Deserialize, Serialize};

use crate::domain::error::FinetuneError;

pub type CpuBackend   = burn::backend::NdArray;
pub type CpuAutodiff  = burn::backend::Autodiff<CpuBackend>;

#[cfg(feature = "wgpu")]
pub type WgpuBackend  = burn::backend::Wgpu;
#[cfg(feature = "wgpu")]
pub type WgpuAutodiff = burn::backend::Autodiff<WgpuBackend>;

/// Device requested in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceKind {
    #[default]
    Cpu,
    Wgpu,
}

/// Device actually used for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Cpu,
    #[cfg(feature = "wgpu")]
    Wgpu,
}

pub fn resolve(requested: DeviceKind) -> Accelerator {
    match try_resolve(requested) {
        Ok(acc) => acc,
        Err(e)  => {
            tracing::warn!("{e}; falling back to CPU");
            Accelerator::Cpu
        }
    }
}

fn try_resolve(requested: DeviceKind) -> Result<Accelerator, FinetuneError> {
    match requested {
        DeviceKind::Cpu => Ok(Accelerator::Cpu),
        #[cfg(feature = "wgpu")]
        DeviceKind::Wgpu => Ok(Accelerator::Wgpu),
        #[cfg(not(feature = "wgpu"))]
        DeviceKind::Wgpu => Err(FinetuneError::Device {
            requested: "wgpu".to_string(),
            reason:    "built without the `wgpu` feature".to_string(),
        }),
    }
}
