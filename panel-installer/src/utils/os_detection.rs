use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingSystem {
    Windows,
    Linux,
    Unknown,
}

/// Detect the current operating system
pub fn detect_os() -> OperatingSystem {
    #[cfg(target_os = "windows")]
    return OperatingSystem::Windows;

    #[cfg(target_os = "linux")]
    return OperatingSystem::Linux;

    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    return OperatingSystem::Unknown;
}

/// Windows kernel version as `(major, minor, build)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WindowsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

/// Parse the output of `cmd /c ver`, e.g. `Microsoft Windows [Version 10.0.17763.1879]`.
pub fn parse_windows_ver_output(output: &str) -> Option<WindowsVersion> {
    let re = Regex::new(r"(\d+)\.(\d+)\.(\d+)").ok()?;
    let caps = re.captures(output)?;
    Some(WindowsVersion {
        major: caps[1].parse().ok()?,
        minor: caps[2].parse().ok()?,
        build: caps[3].parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ver_banner() {
        let v = parse_windows_ver_output("\r\nMicrosoft Windows [Version 10.0.17763.1879]\r\n")
            .expect("version");
        assert_eq!(
            v,
            WindowsVersion {
                major: 10,
                minor: 0,
                build: 17763
            }
        );
        assert!(v >= WindowsVersion { major: 6, minor: 1, build: 0 });
    }

    #[test]
    fn garbage_has_no_version() {
        assert!(parse_windows_ver_output("command not found").is_none());
    }
}
