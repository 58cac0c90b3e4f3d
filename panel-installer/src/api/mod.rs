// Host-facing actions
//
// Every function here takes the property bag explicitly, mutates it, and returns a binary
// ActionResult. Immediate actions run unprivileged while the host collects input; deferred
// actions run elevated from a serialized DeferredRequest.

pub mod database;
pub mod deferred;
pub mod prefill;
pub mod preflight;
pub mod ui;

use clap::ValueEnum;
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

use crate::database::connection::{DbConnector, RealDbConnector};
use crate::discovery::locator::{ComponentLocator, DriveProvider, SystemDrives};
use crate::installation::backup::BackupRegistry;
use crate::installation::host::{HostProbe, SystemControl};
use crate::installation::pipeline::{ActionContext, CancelFlag};
use crate::installation::progress::{JsonLinesReporter, Progress, ProgressReporter};
use crate::installation::system_host;
use crate::installation::web_features::{reserve_web_features, WebFeatureSelection};
use crate::models::bag::PropertyBag;
use crate::models::responses::ActionResult;
use crate::utils::settings::EngineSettings;

/// Everything an action needs from the outside world.
pub struct Engine {
    pub settings: EngineSettings,
    pub host: Arc<dyn SystemControl>,
    pub probe: Arc<dyn HostProbe>,
    pub db: Arc<dyn DbConnector>,
    pub drives: Arc<dyn DriveProvider>,
    pub locator: ComponentLocator,
    pub reporter: Arc<dyn ProgressReporter>,
}

impl Engine {
    /// Engine bound to the running machine; progress goes to stdout as JSON lines.
    pub fn new(settings: EngineSettings) -> Self {
        let (host, probe) = system_host(&settings);
        Self {
            db: Arc::new(RealDbConnector::new(settings.sql_connect_timeout())),
            drives: Arc::new(SystemDrives),
            locator: ComponentLocator::new(&settings),
            reporter: Arc::new(JsonLinesReporter::stdout()),
            host,
            probe,
            settings,
        }
    }

    pub fn progress(&self, correlation_id: &str) -> Progress {
        Progress::new(correlation_id, self.reporter.clone())
    }

    pub fn action_context(&self, correlation_id: &str, cancel: CancelFlag) -> ActionContext {
        ActionContext {
            host: self.host.clone(),
            db: self.db.clone(),
            backups: BackupRegistry::new(&self.settings.product_name, &self.settings.main_config_name),
            progress: self.progress(correlation_id),
            cancel,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

/// Actions the host runs against its live property bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImmediateAction {
    PrefillSettings,
    PrereqCheck,
    PrereqCheckUi,
    CheckConnectionUi,
    DbListUi,
    SqlServerListUi,
    SetEserverUrlUi,
    RecapListUi,
    FillIpListUi,
    DatabaseConnectionValidate,
    ServerAdminValidate,
    ServerValidateAd,
    EserverValidateAd,
    PortalValidateAd,
    ServerAccessValidate,
    ReserveWebFeatures,
}

pub async fn run_immediate(engine: &Engine, action: ImmediateAction, bag: &mut PropertyBag) -> ActionResult {
    let started = Instant::now();
    info!(
        "[PHASE: immediate] [STEP: {:?}] Action entered",
        action
    );

    let result = match action {
        ImmediateAction::PrefillSettings => prefill::prefill_settings(engine, bag).await,
        ImmediateAction::PrereqCheck => {
            preflight::prereq_check(engine.probe.as_ref(), &engine.progress("prereq"), bag).await
        }
        ImmediateAction::PrereqCheckUi => preflight::prereq_check_ui(bag),
        ImmediateAction::CheckConnectionUi => database::check_connection_ui(engine.db.as_ref(), bag).await,
        ImmediateAction::DbListUi => database::db_list_ui(engine.db.as_ref(), bag).await,
        ImmediateAction::SqlServerListUi => {
            database::sql_server_list_ui(engine.settings.sql_browser_timeout(), bag).await
        }
        ImmediateAction::SetEserverUrlUi => ui::set_eserver_url_ui(bag),
        ImmediateAction::RecapListUi => ui::recap_list_ui(bag),
        ImmediateAction::FillIpListUi => ui::fill_ip_list_ui(engine.probe.as_ref(), bag).await,
        ImmediateAction::DatabaseConnectionValidate => ui::database_connection_validate(bag),
        ImmediateAction::ServerAdminValidate => ui::server_admin_validate(bag),
        ImmediateAction::ServerValidateAd => ui::server_validate_ad(bag),
        ImmediateAction::EserverValidateAd => ui::eserver_validate_ad(bag),
        ImmediateAction::PortalValidateAd => ui::portal_validate_ad(bag),
        ImmediateAction::ServerAccessValidate => ui::server_access_validate(bag),
        ImmediateAction::ReserveWebFeatures => {
            let progress = engine.progress(&uuid::Uuid::new_v4().to_string());
            reserve_web_features(&progress, WebFeatureSelection::from_bag(bag));
            ActionResult::Success
        }
    };

    if result.is_success() {
        info!(
            "[PHASE: immediate] [STEP: {:?}] Action exit ok (duration_ms={})",
            action,
            started.elapsed().as_millis()
        );
    } else {
        error!(
            "[PHASE: immediate] [STEP: {:?}] Action failed (duration_ms={})",
            action,
            started.elapsed().as_millis()
        );
    }
    result
}
