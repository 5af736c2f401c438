//! Host audio routing.
//!
//! To capture system audio without muting it for the user, playback is duplicated into a
//! loopback device through a multi-output device, and an aggregate input combines the
//! loopback with the microphone. The backend that creates and removes these devices sits
//! behind [`DeviceRouter`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SessionResult;

pub mod pulse;

pub use pulse::PulseRouter;

/// Identifier of a routing device this tool created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The loopback-capable device that system audio is tapped from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingSource {
    pub uid: String,
    pub name: String,
}

/// Everything `create_routing_devices` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDevices {
    pub multi_output_id: DeviceId,
    pub aggregate_id: DeviceId,
    /// Input name a capture process reads mic + system audio from.
    pub aggregate_capture_name: String,
    /// Input name carrying system audio only (dual-stream capture).
    pub system_capture_name: String,
    /// Default output before any routing device existed.
    pub original_output_id: String,
    pub mic_id: String,
}

impl RoutingDevices {
    /// Created ids in creation order.
    pub fn created_ids(&self) -> Vec<DeviceId> {
        vec![self.multi_output_id, self.aggregate_id]
    }
}

#[async_trait]
pub trait DeviceRouter: Send + Sync {
    /// Locate the loopback device used to tap system audio.
    async fn find_routing_source(&self) -> SessionResult<RoutingSource>;

    /// The host's current default playback device.
    async fn current_output(&self) -> SessionResult<String>;

    /// Create the multi-output and aggregate devices and point playback at the
    /// multi-output device. All-or-nothing: on error nothing created is left behind.
    async fn create_routing_devices(&self, source: &RoutingSource) -> SessionResult<RoutingDevices>;

    /// Remove the given devices, newest first. Ids that no longer exist are skipped.
    /// Every id is attempted even if an earlier one fails.
    async fn destroy_routing_devices(&self, ids: &[DeviceId]) -> SessionResult<()>;

    /// Set the default playback device.
    async fn switch_output(&self, output_id: &str) -> SessionResult<()>;

    /// Remove devices left behind by a session that crashed. Returns how many were removed.
    async fn destroy_stale_devices(&self) -> SessionResult<usize>;
}
