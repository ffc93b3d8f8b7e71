use whitebox_netconf::TunnelController;

/// Daemon-wide shared state
pub struct DaemonState {
    /// Owns the device; serializes every configure and disconnect
    pub controller: TunnelController,
}

impl DaemonState {
    pub fn new(controller: TunnelController) -> Self {
        Self { controller }
    }
}
