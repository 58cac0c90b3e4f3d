// Web platform features
//
// Optional web-server role services, ASP.NET and .NET 3.5 enabled through the platform
// feature tool before the components are installed. The deferred run reports its own
// progress bar; the immediate run only reserves ticks for it.

use anyhow::Result;
use log::{error, info};
use std::time::Instant;

use crate::installation::host::SystemControl;
use crate::installation::progress::Progress;
use crate::models::bag::{PropertyBag, YesNo};

pub const PROGRESS_ACTION: &str = "InstallWebFeatures";

const WEB_ROLE_FEATURES: &[&str] = &[
    "IIS-WebServerRole",
    "IIS-WebServer",
    "IIS-CommonHttpFeatures",
    "IIS-StaticContent",
    "IIS-DefaultDocument",
    "IIS-HttpErrors",
    "IIS-HttpLogging",
    "IIS-RequestFiltering",
    "IIS-WindowsAuthentication",
    "IIS-ManagementConsole",
];

const WEB_DEV_FEATURES: &[&str] = &[
    "IIS-ApplicationDevelopment",
    "IIS-NetFxExtensibility45",
    "IIS-ISAPIExtensions",
    "IIS-ISAPIFilter",
    "IIS-ASPNET45",
];

const NETFX3_FEATURES: &[&str] = &["NetFx3"];

/// Which feature groups the user asked for. Anything other than an explicit "no" selects a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebFeatureSelection {
    pub web_server: bool,
    pub aspnet: bool,
    pub netfx3: bool,
}

impl WebFeatureSelection {
    pub fn from_bag(bag: &PropertyBag) -> Self {
        let wanted = |key: &str| bag.get(key) != YesNo::No.as_str();
        Self {
            web_server: wanted("PI_PREREQ_IIS_INSTALL"),
            aspnet: wanted("PI_PREREQ_ASPNET_INSTALL"),
            netfx3: wanted("PI_PREREQ_NETFX_INSTALL"),
        }
    }

    /// Feature names in install order.
    pub fn features(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.web_server {
            out.extend_from_slice(WEB_ROLE_FEATURES);
        }
        if self.aspnet {
            out.extend_from_slice(WEB_DEV_FEATURES);
        }
        if self.netfx3 {
            out.extend_from_slice(NETFX3_FEATURES);
        }
        out
    }
}

/// Immediate phase: announce how many ticks the deferred install will need.
pub fn reserve_web_features(progress: &Progress, selection: WebFeatureSelection) {
    let count = selection.features().len() as u32;
    info!(
        "[PHASE: web_features] [STEP: reserve] Reserving progress (features={})",
        count
    );
    progress.reserve(count);
}

/// Deferred phase: enable every selected feature in order, then register ASP.NET with the
/// web server when it was selected.
///
/// The bar is reset to `n + 1` up front and to `3n + 1` when done, whether or not the run
/// succeeded, so the host's estimate for the remaining actions stays consistent.
pub async fn install_web_features(
    host: &dyn SystemControl,
    progress: &Progress,
    selection: WebFeatureSelection,
) -> Result<()> {
    let started = Instant::now();
    let features = selection.features();
    let total = features.len() as u32;
    info!(
        "[PHASE: web_features] [STEP: install] install_web_features entered (features={}, selection={:?})",
        total, selection
    );

    progress.reset(total + 1);
    progress.text(PROGRESS_ACTION, "Installing necessary web components ...");

    let mut tool_log = Vec::new();
    let mut result = install_each(host, progress, &features, &mut tool_log).await;
    if result.is_ok() && selection.aspnet {
        progress.text(PROGRESS_ACTION, "Registering ASP.NET with the web server ...");
        result = host.register_aspnet().await;
    }

    progress.reset(total * 3 + 1);
    if !tool_log.is_empty() {
        info!(
            "[PHASE: web_features] [STEP: install] Feature tool log: {}",
            tool_log.join(" | ")
        );
    }

    match &result {
        Ok(()) => info!(
            "[PHASE: web_features] [STEP: install] install_web_features exit ok (duration_ms={})",
            started.elapsed().as_millis()
        ),
        Err(e) => error!(
            "[PHASE: web_features] [STEP: install] install_web_features failed (duration_ms={}): {:#}",
            started.elapsed().as_millis(),
            e
        ),
    }
    result
}

async fn install_each(
    host: &dyn SystemControl,
    progress: &Progress,
    features: &[&str],
    tool_log: &mut Vec<String>,
) -> Result<()> {
    for (i, feature) in features.iter().enumerate() {
        progress.text(
            PROGRESS_ACTION,
            format!(
                "Installing web component the {} a {} of {}",
                feature,
                i + 1,
                features.len()
            ),
        );
        progress.increment(1);
        let out = host.install_feature(feature).await?;
        if !out.trim().is_empty() {
            tool_log.push(out.trim().to_string());
        }
    }
    Ok(())
}
