use thiserror::Error;

/// Failure at the peripheral boundary. Everything the control layer
/// sees from hardware funnels through this type.
#[derive(Debug, Clone, Error)]
pub enum HardwareError {
    #[error("write to {device} failed: {detail}")]
    Write { device: &'static str, detail: String },

    #[error("read from {device} failed: {detail}")]
    Read { device: &'static str, detail: String },

    #[error("{device} is not configured for this operation")]
    Unsupported { device: &'static str },
}

impl HardwareError {
    pub fn write(device: &'static str, detail: impl Into<String>) -> Self {
        Self::Write {
            device,
            detail: detail.into(),
        }
    }

    pub fn read(device: &'static str, detail: impl Into<String>) -> Self {
        Self::Read {
            device,
            detail: detail.into(),
        }
    }
}
