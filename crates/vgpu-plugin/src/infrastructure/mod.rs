pub mod nvml_source;

pub use nvml_source::init_nvml;
pub use nvml_source::NvmlDeviceSource;
