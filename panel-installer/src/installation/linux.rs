// Non-Windows host
//
// The components are IIS web applications and Windows services, so nothing here can mutate the
// machine. Every control operation fails with `SetupError::Unsupported`; the probe still answers
// what it can so the prerequisite checklist renders on any host.

use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use std::net::Ipv4Addr;

use crate::installation::host::{
    HostProbe, NetFramework, ServiceSpec, SiteSpec, SystemControl,
};
use crate::models::errors::SetupError;
use crate::utils::os_detection::WindowsVersion;

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

fn unsupported<T>(what: &str) -> Result<T> {
    warn!(
        "[PHASE: installation] [STEP: host] {} requested on a non-Windows host",
        what
    );
    Err(SetupError::Unsupported(what.to_string()).into())
}

#[async_trait]
impl SystemControl for LinuxHost {
    async fn app_pool_exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn stop_app_pool(&self, _name: &str) -> Result<()> {
        // Nothing can be running here; stopping is a no-op.
        Ok(())
    }

    async fn start_app_pool(&self, _name: &str) -> Result<()> {
        unsupported("Application pool control")
    }

    async fn configure_site(&self, _site: &SiteSpec) -> Result<()> {
        unsupported("Web site configuration")
    }

    async fn remove_site(&self, _site: &SiteSpec) -> Result<()> {
        Ok(())
    }

    async fn service_exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn stop_service(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn start_service(&self, _name: &str) -> Result<()> {
        unsupported("Windows service control")
    }

    async fn install_service(&self, _spec: &ServiceSpec) -> Result<()> {
        unsupported("Windows service installation")
    }

    async fn remove_service(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn user_exists(&self, _domain: &str, _login: &str) -> Result<bool> {
        Ok(false)
    }

    async fn install_feature(&self, _feature: &str) -> Result<String> {
        Err(SetupError::InstallToolNotFound.into())
    }

    async fn register_aspnet(&self) -> Result<()> {
        unsupported("ASP.NET registration")
    }
}

#[async_trait]
impl HostProbe for LinuxHost {
    async fn is_elevated(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: geteuid has no preconditions and cannot fail.
            unsafe { libc::geteuid() == 0 }
        }

        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }

    async fn os_version(&self) -> Option<WindowsVersion> {
        None
    }

    async fn web_server_version(&self) -> Option<u32> {
        None
    }

    async fn aspnet_registered(&self) -> bool {
        false
    }

    async fn net_framework_installed(&self, _fx: NetFramework) -> bool {
        false
    }

    async fn ipv4_addresses(&self) -> Vec<Ipv4Addr> {
        #[cfg(target_os = "linux")]
        {
            interface_ipv4_addresses()
        }

        #[cfg(not(target_os = "linux"))]
        {
            vec![Ipv4Addr::LOCALHOST]
        }
    }
}

#[cfg(target_os = "linux")]
fn interface_ipv4_addresses() -> Vec<Ipv4Addr> {
    let mut out = Vec::new();
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: getifaddrs fills `head` with a list we release with freeifaddrs below.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        warn!("[PHASE: installation] [STEP: host] getifaddrs failed; only loopback reported");
        return vec![Ipv4Addr::LOCALHOST];
    }

    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: `cursor` is a node of the list returned by getifaddrs and not yet freed.
        let ifa = unsafe { &*cursor };
        let up = ifa.ifa_flags & (libc::IFF_UP as libc::c_uint) != 0;
        if up && !ifa.ifa_addr.is_null() {
            // SAFETY: ifa_addr is non-null and points at a sockaddr owned by the list.
            let family = unsafe { (*ifa.ifa_addr).sa_family } as libc::c_int;
            if family == libc::AF_INET {
                // SAFETY: AF_INET addresses are laid out as sockaddr_in.
                let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                if !out.contains(&ip) {
                    out.push(ip);
                }
            }
        }
        cursor = ifa.ifa_next;
    }
    // SAFETY: `head` came from a successful getifaddrs call.
    unsafe { libc::freeifaddrs(head) };
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::errors::is_declared;

    #[tokio::test]
    async fn idempotent_stops_succeed_and_mutations_are_declared_failures() {
        let host = LinuxHost;
        assert!(host.stop_app_pool("pool").await.is_ok());
        assert!(host.stop_service("svc").await.is_ok());

        let err = host.start_service("svc").await.expect_err("unsupported");
        assert!(is_declared(&err));
        let err = host.install_feature("IIS-WebServerRole").await.expect_err("no tool");
        assert!(is_declared(&err));
    }

    #[tokio::test]
    async fn probe_reports_no_windows_facts() {
        let host = LinuxHost;
        assert!(host.os_version().await.is_none());
        assert!(host.web_server_version().await.is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn loopback_is_listed() {
        assert!(LinuxHost.ipv4_addresses().await.contains(&Ipv4Addr::LOCALHOST));
    }
}
