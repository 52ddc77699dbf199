use thiserror::Error;

/// Errors reported by the device abstraction.
#[derive(Clone, Debug, Error)]
pub enum DeviceError {
    #[error("out of device memory")]
    OutOfMemory,
    #[error("invalid resource description: {0}")]
    InvalidDescription(String),
    #[error("device error: {0}")]
    Other(String),
}

/// Errors carried by readiness handles when an asset fails to become ready.
#[derive(Clone, Debug, Error)]
pub enum AssetError {
    /// The asset is invalid and will never be usable.
    #[error("asset `{name}` is invalid: {reason}")]
    Invalid { name: String, reason: String },
    /// The producer dropped the readiness promise without fulfilling it.
    #[error("readiness promise abandoned")]
    Abandoned,
}

/// Errors that can escape a draw call.
#[derive(Debug, Error)]
pub enum DrawError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    /// An execute function failed; the draw loop restored the encoder state before reporting it.
    #[error("drawable execution failed: {0}")]
    Execute(String),
}
