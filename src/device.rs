use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use tracing::info;

use crate::error::{Result, SubflowError};

/// Accelerator used by model-backed collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            "mps" => Ok(Device::Mps),
            _ => Err(SubflowError::Config(format!(
                "Invalid device '{}'. Valid devices: auto, cpu, cuda, mps",
                value
            ))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Mps => "mps",
        };
        f.write_str(name)
    }
}

/// Resolve `Auto` to a concrete device. Concrete requests pass through.
pub fn resolve(requested: Device) -> Device {
    if requested != Device::Auto {
        return requested;
    }

    let detected = if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        Device::Mps
    } else if nvidia_smi_available() {
        Device::Cuda
    } else {
        Device::Cpu
    };

    info!("Resolved processing device: {}", detected);
    detected
}

fn nvidia_smi_available() -> bool {
    Command::new("nvidia-smi")
        .arg("-L")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Device::parse("CUDA").unwrap(), Device::Cuda);
        assert!(Device::parse("tpu").is_err());
    }

    #[test]
    fn test_concrete_device_is_kept() {
        assert_eq!(resolve(Device::Cpu), Device::Cpu);
        assert_ne!(resolve(Device::Auto), Device::Auto);
    }
}
