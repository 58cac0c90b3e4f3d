// Host control seam.
//
// Everything the pipeline and workflows do to the machine outside the filesystem goes through
// `SystemControl`: web-server pools and sites, Windows services, accounts, platform features.
// Stop operations are idempotent: stopping something already stopped or missing succeeds.

use crate::models::components::ComponentKind;
use crate::models::variables::SetupVariables;
use crate::utils::os_detection::WindowsVersion;
use anyhow::Result;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Web site definition derived from one component's variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSpec {
    pub name: String,
    pub application_pool: String,
    pub physical_path: PathBuf,
    pub ip: String,
    pub port: String,
    pub host: String,
    pub identity: Option<ServiceIdentity>,
}

/// Account a pool or service runs as.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub domain: String,
    pub login: String,
    pub password: String,
}

impl ServiceIdentity {
    /// `DOMAIN\login`, or `.\login` for local accounts.
    pub fn qualified_name(&self) -> String {
        let domain = self.domain.trim();
        if domain.is_empty() {
            format!(".\\{}", self.login.trim())
        } else {
            format!("{}\\{}", domain, self.login.trim())
        }
    }
}

impl std::fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceIdentity")
            .field("domain", &self.domain)
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

impl SiteSpec {
    pub fn from_vars(vars: &SetupVariables) -> Self {
        let name = vars
            .kind()
            .map(site_name)
            .unwrap_or_else(|| format!("WebsitePanel {}", vars.component_code));
        Self {
            name,
            application_pool: vars.application_pool.clone(),
            physical_path: vars.install_folder.clone(),
            ip: vars.web_site_ip.clone(),
            port: vars.web_site_port.clone(),
            host: vars.web_site_domain.clone(),
            identity: identity_from_vars(vars),
        }
    }

    /// IIS binding information: `ip:port:host`, with `*` for an unspecified address.
    pub fn binding_information(&self) -> String {
        let ip = match self.ip.trim() {
            "" => "*",
            ip => ip,
        };
        let port = match self.port.trim() {
            "" => "80",
            p => p,
        };
        format!("{}:{}:{}", ip, port, self.host.trim())
    }
}

pub fn site_name(kind: ComponentKind) -> String {
    format!("WebsitePanel {}", kind.name())
}

pub fn identity_from_vars(vars: &SetupVariables) -> Option<ServiceIdentity> {
    if vars.user_account.trim().is_empty() {
        return None;
    }
    Some(ServiceIdentity {
        domain: vars.user_domain.clone(),
        login: vars.user_account.clone(),
        password: vars.user_password.clone(),
    })
}

/// Service definition for `install_service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub display_name: String,
    pub binary: PathBuf,
    pub identity: Option<ServiceIdentity>,
}

impl ServiceSpec {
    /// `None` when the component does not own a service.
    pub fn from_vars(vars: &SetupVariables) -> Option<Self> {
        if !vars.has_service() {
            return None;
        }
        let binary = match Path::new(vars.service_file.trim()) {
            p if p.is_absolute() => p.to_path_buf(),
            p => vars.install_folder.join(p),
        };
        Some(Self {
            name: vars.service_name.trim().to_string(),
            display_name: vars.service_name.trim().to_string(),
            binary,
            identity: identity_from_vars(vars),
        })
    }
}

#[async_trait]
pub trait SystemControl: Send + Sync {
    async fn app_pool_exists(&self, name: &str) -> Result<bool>;
    async fn stop_app_pool(&self, name: &str) -> Result<()>;
    async fn start_app_pool(&self, name: &str) -> Result<()>;

    /// Create or update the pool and site so they match `site`.
    async fn configure_site(&self, site: &SiteSpec) -> Result<()>;
    /// Remove the site and its pool; missing ones are ignored.
    async fn remove_site(&self, site: &SiteSpec) -> Result<()>;

    async fn service_exists(&self, name: &str) -> Result<bool>;
    async fn stop_service(&self, name: &str) -> Result<()>;
    async fn start_service(&self, name: &str) -> Result<()>;
    /// Register the service, replacing a previous registration of the same name.
    async fn install_service(&self, spec: &ServiceSpec) -> Result<()>;
    async fn remove_service(&self, name: &str) -> Result<()>;

    async fn user_exists(&self, domain: &str, login: &str) -> Result<bool>;

    /// Enable one optional platform feature (web-server role service, runtime).
    async fn install_feature(&self, feature: &str) -> Result<String>;

    /// Register ASP.NET 4 with the web server once its features are enabled.
    async fn register_aspnet(&self) -> Result<()>;
}

/// .NET Framework generations the web components depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetFramework {
    V20,
    V35,
    V40Full,
}

/// Read-only facts about the host, consumed by the prerequisite checks.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn is_elevated(&self) -> bool;
    /// `None` when the host is not Windows or the version cannot be read.
    async fn os_version(&self) -> Option<WindowsVersion>;
    /// Major version of the installed web server, `None` when it is not installed.
    async fn web_server_version(&self) -> Option<u32>;
    async fn aspnet_registered(&self) -> bool;
    async fn net_framework_installed(&self, fx: NetFramework) -> bool;
    /// IPv4 addresses of interfaces that are up, loopback included.
    async fn ipv4_addresses(&self) -> Vec<Ipv4Addr>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_defaults_to_any_address() {
        let site = SiteSpec {
            name: "WebsitePanel Portal".into(),
            application_pool: "pool".into(),
            physical_path: PathBuf::from("C:\\WebsitePanel\\Portal"),
            ip: "".into(),
            port: "9001".into(),
            host: "".into(),
            identity: None,
        };
        assert_eq!(site.binding_information(), "*:9001:");

        let site = SiteSpec {
            ip: "10.0.0.5".into(),
            host: "panel.example.com".into(),
            ..site
        };
        assert_eq!(site.binding_information(), "10.0.0.5:9001:panel.example.com");
    }

    #[test]
    fn service_spec_only_for_components_with_a_service() {
        let mut vars = SetupVariables {
            component_code: "server".into(),
            install_folder: PathBuf::from("/opt/wsp/Server"),
            ..Default::default()
        };
        assert!(ServiceSpec::from_vars(&vars).is_none());

        vars.service_name = "WebsitePanel Scheduler".into();
        vars.service_file = "bin/WebsitePanel.SchedulerService.exe".into();
        let spec = ServiceSpec::from_vars(&vars).expect("spec");
        assert_eq!(
            spec.binary,
            PathBuf::from("/opt/wsp/Server").join("bin/WebsitePanel.SchedulerService.exe")
        );
    }

    #[test]
    fn identity_debug_hides_password() {
        let id = ServiceIdentity {
            domain: "".into(),
            login: "WPServer".into(),
            password: "hunter2".into(),
        };
        assert_eq!(id.qualified_name(), ".\\WPServer");
        assert!(!format!("{:?}", id).contains("hunter2"));
    }
}
