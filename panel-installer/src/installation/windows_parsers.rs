// Windows tool output parsing (cross-platform for testability)
//
// Pure functions over the text printed by `reg.exe`, `appcmd.exe`, `dism.exe` and `ipconfig`.
// The processes themselves are run from windows.rs, which is cfg-gated.

#![cfg_attr(not(windows), allow(dead_code))]

use std::net::Ipv4Addr;

/// `ERROR_SUCCESS_REBOOT_REQUIRED`: DISM finished, a restart completes the change.
pub const DISM_REBOOT_REQUIRED: i32 = 3010;

/// State of an application pool as printed by `appcmd list apppool /text:state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Started,
    Starting,
    Stopped,
    Stopping,
    Unknown,
}

pub fn parse_pool_state(output: &str) -> PoolState {
    match output.trim().to_ascii_lowercase().as_str() {
        "started" => PoolState::Started,
        "starting" => PoolState::Starting,
        "stopped" => PoolState::Stopped,
        "stopping" => PoolState::Stopping,
        _ => PoolState::Unknown,
    }
}

/// Raw data of value `name` from `reg query` output.
///
/// ```text
/// HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\InetStp
///     MajorVersion    REG_DWORD    0xa
/// ```
pub fn parse_reg_value(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let key = parts.next()?;
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        let kind = parts.next()?;
        if !kind.starts_with("REG_") {
            return None;
        }
        let data: Vec<&str> = parts.collect();
        Some(data.join(" "))
    })
}

/// A `REG_DWORD` value; `reg.exe` prints these as hex (`0xa`).
pub fn parse_reg_dword(output: &str, name: &str) -> Option<u32> {
    let raw = parse_reg_value(output, name)?;
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// True when `appcmd list ...` printed at least one object.
pub fn appcmd_listed_any(output: &str) -> bool {
    output.lines().any(|l| !l.trim().is_empty())
}

pub fn dism_exit_ok(code: Option<i32>) -> bool {
    matches!(code, Some(0) | Some(DISM_REBOOT_REQUIRED))
}

/// IPv4 addresses from `ipconfig` output (`IPv4 Address. . . : 10.0.0.5(Preferred)`).
pub fn parse_ipconfig_ipv4(output: &str) -> Vec<Ipv4Addr> {
    let mut out = Vec::new();
    for line in output.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        if !label.trim_start().starts_with("IPv4 Address") && !label.trim_start().starts_with("IP Address") {
            continue;
        }
        let value = value.trim();
        let value = value.split('(').next().unwrap_or(value).trim();
        if let Ok(ip) = value.parse::<Ipv4Addr>() {
            if !out.contains(&ip) {
                out.push(ip);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const INETSTP: &str = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\InetStp\r\n    MajorVersion    REG_DWORD    0xa\r\n    SetupString    REG_SZ    IIS 10.0\r\n\r\n";

    #[test]
    fn reads_dword_in_hex() {
        assert_eq!(parse_reg_dword(INETSTP, "MajorVersion"), Some(10));
        assert_eq!(parse_reg_dword(INETSTP, "MinorVersion"), None);
    }

    #[test]
    fn reads_string_values_with_spaces() {
        assert_eq!(
            parse_reg_value(INETSTP, "SetupString").as_deref(),
            Some("IIS 10.0")
        );
    }

    #[test]
    fn key_header_is_not_a_value() {
        assert_eq!(
            parse_reg_value(INETSTP, "HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\InetStp"),
            None
        );
    }

    #[test]
    fn pool_states() {
        assert_eq!(parse_pool_state("Stopped\r\n"), PoolState::Stopped);
        assert_eq!(parse_pool_state("Started"), PoolState::Started);
        assert_eq!(parse_pool_state(""), PoolState::Unknown);
    }

    #[test]
    fn dism_reboot_required_counts_as_success() {
        assert!(dism_exit_ok(Some(0)));
        assert!(dism_exit_ok(Some(3010)));
        assert!(!dism_exit_ok(Some(87)));
        assert!(!dism_exit_ok(None));
    }

    #[test]
    fn ipconfig_addresses() {
        let out = "Ethernet adapter Ethernet0:\r\n\r\n   Connection-specific DNS Suffix  . : lan\r\n   IPv4 Address. . . . . . . . . . . : 192.168.10.20(Preferred) \r\n   Subnet Mask . . . . . . . . . . . : 255.255.255.0\r\n   IPv6 Address. . . . . . . . . . . : fe80::1\r\n   IPv4 Address. . . . . . . . . . . : 10.0.0.5\r\n";
        assert_eq!(
            parse_ipconfig_ipv4(out),
            vec![Ipv4Addr::new(192, 168, 10, 20), Ipv4Addr::new(10, 0, 0, 5)]
        );
        assert!(parse_ipconfig_ipv4("").is_empty());
    }

    #[test]
    fn appcmd_empty_listing() {
        assert!(!appcmd_listed_any("\r\n"));
        assert!(appcmd_listed_any("APPPOOL \"WebsitePanel Portal Pool\" (MgdVersion:v4.0,MgdMode:Integrated,state:Started)\r\n"));
    }
}
