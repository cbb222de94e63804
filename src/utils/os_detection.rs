use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    MacOs,
    Windows,
    Other,
}

pub fn detect_platform() -> HostPlatform {
    let platform = match std::env::consts::OS {
        "linux" => HostPlatform::Linux,
        "macos" => HostPlatform::MacOs,
        "windows" => HostPlatform::Windows,
        _ => HostPlatform::Other,
    };
    debug!("[PHASE: requirements] [STEP: os] Detected: {:?}", platform);
    platform
}

impl HostPlatform {
    /// Platforms the installed application is deployed on.
    pub fn is_supported(self) -> bool {
        matches!(self, HostPlatform::Linux | HostPlatform::MacOs)
    }
}

pub fn os_description() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}
