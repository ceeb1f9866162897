use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlimeError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Couldn't build the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Couldn't find a compatible compute device")]
    NoCompatibleDevice,
    #[error("The compute device refused our request: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("Compute program failed to build: {0}")]
    ProgramBuild(String),
    #[error("Couldn't map a device buffer for reading: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
    #[error("Device readback was abandoned before it completed")]
    ReadbackAbandoned,
    #[error("Render buffer holds {actual} bytes but the trail field has {expected} cells")]
    RenderBufferSize { expected: usize, actual: usize },
}
