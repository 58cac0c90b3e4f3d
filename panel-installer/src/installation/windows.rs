// Windows host
//
// Web-server pools and sites through `appcmd.exe`, services through service.rs, platform
// features through `dism.exe`, and host facts through `reg.exe`/`net.exe`.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Instant;
use tokio::time::Duration;

use crate::installation::host::{
    HostProbe, NetFramework, ServiceSpec, SiteSpec, SystemControl,
};
use crate::installation::run_cmd_with_timeout;
use crate::installation::service;
use crate::installation::windows_parsers::{
    appcmd_listed_any, dism_exit_ok, parse_ipconfig_ipv4, parse_pool_state, parse_reg_dword,
    PoolState,
};
use crate::models::errors::SetupError;
use crate::utils::os_detection::{parse_windows_ver_output, WindowsVersion};

const QUERY_TIMEOUT: Duration = Duration::from_secs(20);

const INETSTP_KEY: &str = r"HKLM\SOFTWARE\Microsoft\InetStp";
const ASPNET_KEY: &str = r"HKLM\SOFTWARE\Microsoft\ASP.NET\4.0.30319.0";

fn net_framework_key(fx: NetFramework) -> (&'static str, &'static str) {
    match fx {
        NetFramework::V20 => (r"HKLM\SOFTWARE\Microsoft\NET Framework Setup\NDP\v2.0.50727", "Install"),
        NetFramework::V35 => (r"HKLM\SOFTWARE\Microsoft\NET Framework Setup\NDP\v3.5", "Install"),
        NetFramework::V40Full => (r"HKLM\SOFTWARE\Microsoft\NET Framework Setup\NDP\v4\Full", "Install"),
    }
}

#[derive(Debug, Clone)]
pub struct WindowsHost {
    appcmd: PathBuf,
    command_timeout: Duration,
}

impl WindowsHost {
    pub fn new(command_timeout: Duration) -> Self {
        let appcmd = which::which("appcmd").unwrap_or_else(|_| {
            std::env::var_os("windir")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(r"C:\Windows"))
                .join("System32")
                .join("inetsrv")
                .join("appcmd.exe")
        });
        Self {
            appcmd,
            command_timeout,
        }
    }

    async fn appcmd(&self, args: &[String], op: &str) -> Result<crate::installation::CommandOutput> {
        let program = self.appcmd.to_string_lossy().to_string();
        run_cmd_with_timeout(&program, args, self.command_timeout, op).await
    }

    async fn appcmd_ok(&self, args: &[String], op: &str) -> Result<()> {
        let out = self.appcmd(args, op).await?;
        if out.exit_code != Some(0) {
            warn!(
                "[PHASE: installation] [STEP: iis] appcmd failed (operation={}, exit_code={:?}) stdout={}",
                op,
                out.exit_code,
                out.stdout.trim()
            );
            anyhow::bail!("appcmd {} failed (exit_code={:?})", op, out.exit_code);
        }
        Ok(())
    }

    async fn pool_state(&self, name: &str) -> Result<PoolState> {
        let out = self
            .appcmd(
                &[
                    "list".to_string(),
                    "apppool".to_string(),
                    format!("/name:{}", name),
                    "/text:state".to_string(),
                ],
                "appcmd_pool_state",
            )
            .await?;
        Ok(parse_pool_state(&out.stdout))
    }

    async fn site_exists(&self, name: &str) -> Result<bool> {
        let out = self
            .appcmd(
                &["list".to_string(), "site".to_string(), format!("/name:{}", name)],
                "appcmd_list_site",
            )
            .await?;
        Ok(out.exit_code == Some(0) && appcmd_listed_any(&out.stdout))
    }

    async fn reg_query(&self, key: &str, value: &str) -> Option<String> {
        match run_cmd_with_timeout(
            "reg",
            &["query".to_string(), key.to_string(), "/v".to_string(), value.to_string()],
            QUERY_TIMEOUT,
            "reg_query",
        )
        .await
        {
            Ok(out) if out.exit_code == Some(0) => Some(out.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!(
                    "[PHASE: preflight] [STEP: registry] reg query failed (key={}, err={})",
                    key, e
                );
                None
            }
        }
    }
}

#[async_trait]
impl SystemControl for WindowsHost {
    async fn app_pool_exists(&self, name: &str) -> Result<bool> {
        let out = self
            .appcmd(
                &["list".to_string(), "apppool".to_string(), format!("/name:{}", name)],
                "appcmd_list_pool",
            )
            .await?;
        Ok(out.exit_code == Some(0) && appcmd_listed_any(&out.stdout))
    }

    async fn stop_app_pool(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() || !self.app_pool_exists(name).await? {
            debug!(
                "[PHASE: installation] [STEP: iis] stop_app_pool no-op (pool={}, reason=missing)",
                name
            );
            return Ok(());
        }
        if self.pool_state(name).await? == PoolState::Stopped {
            debug!(
                "[PHASE: installation] [STEP: iis] stop_app_pool no-op (pool={}, reason=stopped)",
                name
            );
            return Ok(());
        }
        self.appcmd_ok(
            &["stop".to_string(), "apppool".to_string(), format!("/apppool.name:{}", name)],
            "appcmd_stop_pool",
        )
        .await
    }

    async fn start_app_pool(&self, name: &str) -> Result<()> {
        if self.pool_state(name).await? == PoolState::Started {
            return Ok(());
        }
        self.appcmd_ok(
            &["start".to_string(), "apppool".to_string(), format!("/apppool.name:{}", name)],
            "appcmd_start_pool",
        )
        .await
    }

    async fn configure_site(&self, site: &SiteSpec) -> Result<()> {
        let started = Instant::now();
        info!(
            "[PHASE: installation] [STEP: iis] configure_site entered (site={}, pool={}, binding={})",
            site.name,
            site.application_pool,
            site.binding_information()
        );

        if !self.app_pool_exists(&site.application_pool).await? {
            self.appcmd_ok(
                &[
                    "add".to_string(),
                    "apppool".to_string(),
                    format!("/name:{}", site.application_pool),
                    "/managedRuntimeVersion:v4.0".to_string(),
                    "/managedPipelineMode:Integrated".to_string(),
                ],
                "appcmd_add_pool",
            )
            .await?;
        }
        if let Some(id) = site.identity.as_ref() {
            self.appcmd_ok(
                &[
                    "set".to_string(),
                    "apppool".to_string(),
                    format!("/apppool.name:{}", site.application_pool),
                    "/processModel.identityType:SpecificUser".to_string(),
                    format!("/processModel.userName:{}", id.qualified_name()),
                    format!("/processModel.password:{}", id.password),
                ],
                "appcmd_set_pool_identity",
            )
            .await?;
        }

        let bindings = format!("/bindings:http/{}", site.binding_information());
        let physical = format!("/physicalPath:{}", site.physical_path.to_string_lossy());
        if self.site_exists(&site.name).await? {
            self.appcmd_ok(
                &[
                    "set".to_string(),
                    "site".to_string(),
                    format!("/site.name:{}", site.name),
                    bindings,
                ],
                "appcmd_set_site",
            )
            .await?;
            self.appcmd_ok(
                &[
                    "set".to_string(),
                    "vdir".to_string(),
                    format!("/vdir.name:{}/", site.name),
                    physical,
                ],
                "appcmd_set_vdir",
            )
            .await?;
        } else {
            self.appcmd_ok(
                &[
                    "add".to_string(),
                    "site".to_string(),
                    format!("/name:{}", site.name),
                    bindings,
                    physical,
                ],
                "appcmd_add_site",
            )
            .await?;
        }
        self.appcmd_ok(
            &[
                "set".to_string(),
                "app".to_string(),
                format!("{}/", site.name),
                format!("/applicationPool:{}", site.application_pool),
            ],
            "appcmd_set_app_pool",
        )
        .await?;

        info!(
            "[PHASE: installation] [STEP: iis] configure_site exit (site={}, duration_ms={})",
            site.name,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    async fn remove_site(&self, site: &SiteSpec) -> Result<()> {
        if self.site_exists(&site.name).await? {
            self.appcmd_ok(
                &["delete".to_string(), "site".to_string(), format!("/site.name:{}", site.name)],
                "appcmd_delete_site",
            )
            .await?;
        }
        if !site.application_pool.trim().is_empty()
            && self.app_pool_exists(&site.application_pool).await?
        {
            self.appcmd_ok(
                &[
                    "delete".to_string(),
                    "apppool".to_string(),
                    format!("/apppool.name:{}", site.application_pool),
                ],
                "appcmd_delete_pool",
            )
            .await?;
        }
        Ok(())
    }

    async fn service_exists(&self, name: &str) -> Result<bool> {
        service::windows_service_exists(name).await
    }

    async fn stop_service(&self, name: &str) -> Result<()> {
        service::stop_windows_service(name).await
    }

    async fn start_service(&self, name: &str) -> Result<()> {
        service::start_windows_service(name).await
    }

    async fn install_service(&self, spec: &ServiceSpec) -> Result<()> {
        service::create_windows_service(spec).await
    }

    async fn remove_service(&self, name: &str) -> Result<()> {
        service::stop_windows_service(name).await?;
        service::delete_windows_service(name).await
    }

    async fn user_exists(&self, domain: &str, login: &str) -> Result<bool> {
        if login.trim().is_empty() {
            return Ok(false);
        }
        let mut args = vec!["user".to_string(), login.trim().to_string()];
        if !domain.trim().is_empty() && domain.trim() != "." {
            args.push("/domain".to_string());
        }
        let out = run_cmd_with_timeout("net", &args, QUERY_TIMEOUT, "net_user").await?;
        Ok(out.exit_code == Some(0))
    }

    async fn install_feature(&self, feature: &str) -> Result<String> {
        let dism = which::which("dism").map_err(|_| SetupError::InstallToolNotFound)?;
        let out = run_cmd_with_timeout(
            &dism.to_string_lossy(),
            &[
                "/online".to_string(),
                "/enable-feature".to_string(),
                format!("/featurename:{}", feature),
                "/all".to_string(),
                "/norestart".to_string(),
                "/quiet".to_string(),
            ],
            self.command_timeout,
            "dism_enable_feature",
        )
        .await?;
        if !dism_exit_ok(out.exit_code) {
            anyhow::bail!(
                "Enabling feature {} failed (exit_code={:?})",
                feature,
                out.exit_code
            );
        }
        Ok(out.stdout.trim().to_string())
    }

    async fn register_aspnet(&self) -> Result<()> {
        let framework = if cfg!(target_pointer_width = "64") {
            "Framework64"
        } else {
            "Framework"
        };
        let regiis = std::env::var_os("windir")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Windows"))
            .join("Microsoft.NET")
            .join(framework)
            .join("v4.0.30319")
            .join("aspnet_regiis.exe");
        if !regiis.exists() {
            return Err(SetupError::InstallToolNotFound.into());
        }
        let out = run_cmd_with_timeout(
            &regiis.to_string_lossy(),
            &["-iru".to_string()],
            self.command_timeout,
            "aspnet_regiis",
        )
        .await?;
        if out.exit_code != Some(0) {
            anyhow::bail!("ASP.NET registration failed (exit_code={:?})", out.exit_code);
        }
        debug!(
            "[PHASE: web_features] [STEP: aspnet] aspnet_regiis ok: {}",
            out.stdout.trim()
        );
        Ok(())
    }
}

#[async_trait]
impl HostProbe for WindowsHost {
    async fn is_elevated(&self) -> bool {
        // `net session` only succeeds for members of the local Administrators group.
        match run_cmd_with_timeout("net", &["session".to_string()], QUERY_TIMEOUT, "net_session").await {
            Ok(out) => out.exit_code == Some(0),
            Err(_) => false,
        }
    }

    async fn os_version(&self) -> Option<WindowsVersion> {
        let out = run_cmd_with_timeout(
            "cmd",
            &["/C".to_string(), "ver".to_string()],
            QUERY_TIMEOUT,
            "cmd_ver",
        )
        .await
        .ok()?;
        parse_windows_ver_output(&out.stdout)
    }

    async fn web_server_version(&self) -> Option<u32> {
        let out = self.reg_query(INETSTP_KEY, "MajorVersion").await?;
        parse_reg_dword(&out, "MajorVersion")
    }

    async fn aspnet_registered(&self) -> bool {
        self.reg_query(ASPNET_KEY, "Path").await.is_some()
    }

    async fn net_framework_installed(&self, fx: NetFramework) -> bool {
        let (key, value) = net_framework_key(fx);
        match self.reg_query(key, value).await {
            Some(out) => parse_reg_dword(&out, value) == Some(1),
            None => false,
        }
    }

    async fn ipv4_addresses(&self) -> Vec<Ipv4Addr> {
        let mut out = vec![Ipv4Addr::LOCALHOST];
        match run_cmd_with_timeout("ipconfig", &[], QUERY_TIMEOUT, "ipconfig").await {
            Ok(res) => {
                for ip in parse_ipconfig_ipv4(&res.stdout) {
                    if !out.contains(&ip) {
                        out.push(ip);
                    }
                }
            }
            Err(e) => warn!(
                "[PHASE: installation] [STEP: host] ipconfig failed; only loopback reported: {:#}",
                e
            ),
        }
        out
    }
}
