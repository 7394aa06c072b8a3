//! Translation core: virtual ID codec, registry, fingerprint and stats
//! translators, reservation resolver and the plugin facade composing them.

pub mod fingerprint;
pub mod plugin;
pub mod registry;
pub mod reservation;
pub mod source;
pub mod stats;
pub mod virtual_id;

/// Name of the plugin as reported to the host
pub const PLUGIN_NAME: &str = "nvidia-vgpu";

pub const PLUGIN_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

pub const PLUGIN_TYPE: &str = "device";

pub const DEVICE_API_VERSIONS: &[&str] = &["v0.1.0"];

/// Vendor tag of the virtual device groups. It differs from the physical
/// vendor so the scheduler can address virtual devices as their own resource.
pub const VENDOR: &str = "letmutx";

pub use fingerprint::FingerprintTranslator;
pub use plugin::VgpuPlugin;
pub use registry::DeviceRegistry;
pub use reservation::ReservationError;
pub use reservation::ReservationGrant;
pub use reservation::ReservationResolver;
pub use source::FingerprintEvent;
pub use source::PhysicalDeviceSource;
pub use source::StatsEvent;
pub use source::UpstreamError;
pub use stats::StatsTranslator;
