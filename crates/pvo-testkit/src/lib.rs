//! pvo-testkit
//!
//! Test doubles shared by the workspace's scenario tests:
//! - [`FakeDevice`]: scripted OTA device speaking the wire protocol over any
//!   byte stream (loopback TCP or in-memory duplex), recording what it saw.
//! - [`MemoryArtifactSource`]: release catalogue held in memory.
//! - [`RecordingSink`]: event sink that keeps every published event.
//! - gate and device fixtures for [`pvo_host::HostState`].

mod artifacts;
mod device;
mod fixtures;
mod sink;

pub use artifacts::{firmware_image, manifest_json, MemoryArtifactSource};
pub use device::{DeviceAuth, DeviceLog, Fault, FakeDevice, Phase};
pub use fixtures::{seed_device, set_gates, DEVICE_ID};
pub use sink::RecordingSink;
