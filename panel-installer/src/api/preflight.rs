// Prerequisite checks
//
// Each check returns a CheckResult; the caller appends the message to `PI_PREREQ_LOG` and
// turns the status into a `REQ_*` flag. Whether a Warning blocks the install is up to the
// dialog that reads the flags.

use log::{info, warn};
use std::time::Instant;

use crate::database::connection::DbConnector;
use crate::database::discovery::validate_connection;
use crate::installation::host::{HostProbe, NetFramework};
use crate::installation::progress::Progress;
use crate::models::bag::{PropertyBag, YesNo};
use crate::models::responses::{ActionResult, CheckResult, CheckStatus};

pub const MSG_NO_PERMISSIONS: &str = "You do not have the appropriate permissions to perform this operation. Make sure you are running the application from the local disk and you have local system administrator privileges.";

pub const PREREQ_LOG: &str = "PI_PREREQ_LOG";
pub const CHECKLIST: &str = "REQCHECKLIST";

pub const REQ_OS: &str = "REQ_OS";
pub const REQ_IIS: &str = "REQ_IIS";
pub const REQ_ASPNET: &str = "REQ_ASPNET";
pub const REQ_NETFRAMEWORK20: &str = "REQ_NETFRAMEWORK20";
pub const REQ_NETFRAMEWORK35: &str = "REQ_NETFRAMEWORK35";
pub const REQ_NETFRAMEWORK40FULL: &str = "REQ_NETFRAMEWORK40FULL";

/// Checklist rows in display order.
const CHECKLIST_KEYS: [&str; 6] = [
    REQ_NETFRAMEWORK20,
    REQ_NETFRAMEWORK35,
    REQ_NETFRAMEWORK40FULL,
    REQ_OS,
    REQ_IIS,
    REQ_ASPNET,
];

/// Minimum supported web server major version.
const MIN_WEB_SERVER: u32 = 7;

pub struct PrerequisiteChecker<'a> {
    probe: &'a dyn HostProbe,
}

impl<'a> PrerequisiteChecker<'a> {
    pub fn new(probe: &'a dyn HostProbe) -> Self {
        Self { probe }
    }

    /// Elevated administrator rights.
    pub async fn check_security(&self) -> bool {
        self.probe.is_elevated().await
    }

    /// 6.1 (Windows Server 2008 R2 / 7) and later pass; 6.0 warns; anything else fails.
    pub async fn check_os(&self) -> CheckResult {
        match self.probe.os_version().await {
            Some(v) if (v.major, v.minor) >= (6, 1) => CheckResult::new(
                CheckStatus::Success,
                format!("Operating system version {}.{}.{} is supported.", v.major, v.minor, v.build),
            ),
            Some(v) if (v.major, v.minor) == (6, 0) => CheckResult::new(
                CheckStatus::Warning,
                format!(
                    "Operating system version {}.{}.{} is outdated; some features may not work.",
                    v.major, v.minor, v.build
                ),
            ),
            Some(v) => CheckResult::new(
                CheckStatus::Failure,
                format!("Operating system version {}.{}.{} is not supported.", v.major, v.minor, v.build),
            ),
            None => CheckResult::new(
                CheckStatus::Failure,
                "Unable to determine the operating system version; Windows is required.",
            ),
        }
    }

    pub async fn check_web_server_role(&self) -> CheckResult {
        match self.probe.web_server_version().await {
            Some(major) if major >= MIN_WEB_SERVER => CheckResult::new(
                CheckStatus::Success,
                format!("IIS {} is installed.", major),
            ),
            Some(major) => CheckResult::new(
                CheckStatus::Failure,
                format!("IIS {} is installed; IIS {} or later is required.", major, MIN_WEB_SERVER),
            ),
            None => CheckResult::new(CheckStatus::Failure, "IIS is not installed."),
        }
    }

    pub async fn check_managed_runtime(&self) -> CheckResult {
        if self.probe.aspnet_registered().await {
            CheckResult::new(CheckStatus::Success, "ASP.NET is registered with IIS.")
        } else {
            CheckResult::new(CheckStatus::Failure, "ASP.NET is not registered with IIS.")
        }
    }

    pub async fn check_database(&self, connector: &dyn DbConnector, connection_string: &str) -> CheckResult {
        let (ok, message) = validate_connection(connector, connection_string).await;
        let status = if ok {
            CheckStatus::Success
        } else {
            CheckStatus::Failure
        };
        CheckResult::new(status, message)
    }

    pub async fn net_framework(&self, fx: NetFramework) -> bool {
        self.probe.net_framework_installed(fx).await
    }
}

fn record(bag: &mut PropertyBag, key: &str, result: &CheckResult) {
    bag.append_line(PREREQ_LOG, &result.message);
    bag.set_flag(key, result.is_success());
    info!(
        "[PHASE: preflight] [STEP: {}] {:?}: {}",
        key, result.status, result.message
    );
}

/// Missing elevation is reported to the user and stops here with Failure; otherwise every
/// check runs and Success is returned.
pub async fn prereq_check(probe: &dyn HostProbe, progress: &Progress, bag: &mut PropertyBag) -> ActionResult {
    let started = Instant::now();
    let checker = PrerequisiteChecker::new(probe);

    if !checker.check_security().await {
        warn!("[PHASE: preflight] [STEP: security] Not running elevated");
        bag.append_line(PREREQ_LOG, MSG_NO_PERMISSIONS);
        progress.error(MSG_NO_PERMISSIONS, None);
        return ActionResult::Failure;
    }

    let os = checker.check_os().await;
    record(bag, REQ_OS, &os);
    let iis = checker.check_web_server_role().await;
    record(bag, REQ_IIS, &iis);
    let aspnet = checker.check_managed_runtime().await;
    record(bag, REQ_ASPNET, &aspnet);

    for (key, fx) in [
        (REQ_NETFRAMEWORK20, NetFramework::V20),
        (REQ_NETFRAMEWORK35, NetFramework::V35),
        (REQ_NETFRAMEWORK40FULL, NetFramework::V40Full),
    ] {
        let present = checker.net_framework(fx).await;
        bag.set_flag(key, present);
    }

    info!(
        "[PHASE: preflight] [STEP: end] prereq_check exit (os={:?}, iis={:?}, aspnet={:?}, duration_ms={})",
        os.status,
        iis.status,
        aspnet.status,
        started.elapsed().as_millis()
    );
    ActionResult::Success
}

/// Render the `REQ_*` flags as the prerequisites checklist.
pub fn prereq_check_ui(bag: &mut PropertyBag) -> ActionResult {
    for key in CHECKLIST_KEYS {
        let ok = bag.flag(key) != YesNo::No;
        let title = bag.get(&format!("{}_TITLE", key)).to_string();
        bag.add_check(CHECKLIST, ok, title);
    }
    ActionResult::Success
}
