// Action pipeline
//
// A SetupScript is an ordered list of InstallActions run against one SetupVariables. Execution
// is strictly sequential and fail-fast: the first failing action aborts the script and nothing
// is rolled back. Stops and deletes of things that are already gone count as success.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::database::connection::DbConnector;
use crate::database::discovery::connection_string_database;
use crate::database::scripts::{ensure_database, run_script_file};
use crate::discovery::config_store::ConfigValueStore;
use crate::discovery::version::version_guard;
use crate::installation::backup::BackupRegistry;
use crate::installation::files::{copy_dir_recursive, remove_dir_if_exists};
use crate::installation::host::{ServiceSpec, SiteSpec, SystemControl};
use crate::installation::progress::Progress;
use crate::models::errors::SetupError;
use crate::models::variables::SetupVariables;

/// Host-owned cancellation request, checked between actions.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallAction {
    VersionGuard,
    StopApplicationPool,
    StartApplicationPool,
    Backup,
    StopWindowsService,
    StartWindowsService,
    InstallWindowsService,
    RemoveWindowsService,
    DeleteDirectory(PathBuf),
    CopyFiles { from: PathBuf, to: PathBuf },
    ConfigureWebSite,
    RemoveWebSite,
    CreateDatabase,
    RunSqlScript(PathBuf),
    RegisterComponent,
    UnregisterComponent,
}

impl InstallAction {
    /// Short name used as the progress action label.
    pub fn name(&self) -> &'static str {
        match self {
            InstallAction::VersionGuard => "VersionGuard",
            InstallAction::StopApplicationPool => "StopApplicationPool",
            InstallAction::StartApplicationPool => "StartApplicationPool",
            InstallAction::Backup => "Backup",
            InstallAction::StopWindowsService => "StopWindowsService",
            InstallAction::StartWindowsService => "StartWindowsService",
            InstallAction::InstallWindowsService => "InstallWindowsService",
            InstallAction::RemoveWindowsService => "RemoveWindowsService",
            InstallAction::DeleteDirectory(_) => "DeleteDirectory",
            InstallAction::CopyFiles { .. } => "CopyFiles",
            InstallAction::ConfigureWebSite => "ConfigureWebSite",
            InstallAction::RemoveWebSite => "RemoveWebSite",
            InstallAction::CreateDatabase => "CreateDatabase",
            InstallAction::RunSqlScript(_) => "RunSqlScript",
            InstallAction::RegisterComponent => "RegisterComponent",
            InstallAction::UnregisterComponent => "UnregisterComponent",
        }
    }
}

impl fmt::Display for InstallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallAction::VersionGuard => f.write_str("Checking installed version"),
            InstallAction::StopApplicationPool => f.write_str("Stopping application pool"),
            InstallAction::StartApplicationPool => f.write_str("Starting application pool"),
            InstallAction::Backup => f.write_str("Backing up installation"),
            InstallAction::StopWindowsService => f.write_str("Stopping Windows service"),
            InstallAction::StartWindowsService => f.write_str("Starting Windows service"),
            InstallAction::InstallWindowsService => f.write_str("Installing Windows service"),
            InstallAction::RemoveWindowsService => f.write_str("Removing Windows service"),
            InstallAction::DeleteDirectory(p) => write!(f, "Deleting {}", p.display()),
            InstallAction::CopyFiles { to, .. } => write!(f, "Copying files to {}", to.display()),
            InstallAction::ConfigureWebSite => f.write_str("Configuring web site"),
            InstallAction::RemoveWebSite => f.write_str("Removing web site"),
            InstallAction::CreateDatabase => f.write_str("Creating database"),
            InstallAction::RunSqlScript(p) => write!(f, "Running SQL script {}", p.display()),
            InstallAction::RegisterComponent => f.write_str("Updating installer configuration"),
            InstallAction::UnregisterComponent => f.write_str("Removing component from installer configuration"),
        }
    }
}

/// Everything an action may touch besides the variables.
#[derive(Clone)]
pub struct ActionContext {
    pub host: Arc<dyn SystemControl>,
    pub db: Arc<dyn DbConnector>,
    pub backups: BackupRegistry,
    pub progress: Progress,
    pub cancel: CancelFlag,
}

#[derive(Debug, Clone)]
pub struct SetupScript {
    vars: SetupVariables,
    actions: Vec<InstallAction>,
}

impl SetupScript {
    pub fn new(vars: SetupVariables) -> Self {
        Self {
            vars,
            actions: Vec::new(),
        }
    }

    pub fn push(&mut self, action: InstallAction) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn actions(&self) -> &[InstallAction] {
        &self.actions
    }

    pub fn vars(&self) -> &SetupVariables {
        &self.vars
    }

    /// Run every action in order, stopping at the first failure or cancellation.
    pub async fn execute(&self, ctx: &ActionContext) -> Result<()> {
        let started = Instant::now();
        let total = self.actions.len();
        info!(
            "[PHASE: installation] [STEP: pipeline] execute entered (component={}, actions={})",
            self.vars.component_code, total
        );
        ctx.progress.reset(total as u32);

        for (idx, action) in self.actions.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                warn!(
                    "[PHASE: installation] [STEP: pipeline] Cancelled before action {} of {} ({})",
                    idx + 1,
                    total,
                    action.name()
                );
                return Err(SetupError::Cancelled.into());
            }

            ctx.progress.text(action.name(), action.to_string());
            let action_started = Instant::now();
            if let Err(e) = self.run_action(action, ctx).await {
                error!(
                    "[PHASE: installation] [STEP: pipeline] Action failed (index={}, action={}, duration_ms={}): {:#}",
                    idx + 1,
                    action.name(),
                    action_started.elapsed().as_millis(),
                    e
                );
                return Err(e.context(format!("Action '{}' failed", action.name())));
            }
            debug!(
                "[PHASE: installation] [STEP: pipeline] Action done (index={}, action={}, duration_ms={})",
                idx + 1,
                action.name(),
                action_started.elapsed().as_millis()
            );
            ctx.progress.increment(1);
        }

        info!(
            "[PHASE: installation] [STEP: pipeline] execute exit ok (component={}, duration_ms={})",
            self.vars.component_code,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    async fn run_action(&self, action: &InstallAction, ctx: &ActionContext) -> Result<()> {
        let vars = &self.vars;
        match action {
            InstallAction::VersionGuard => {
                version_guard(&vars.version, &vars.target_version, vars.installer_kind)?;
            }
            InstallAction::StopApplicationPool => {
                let pool = vars.application_pool.trim();
                if pool.is_empty() || !ctx.host.app_pool_exists(pool).await? {
                    debug!(
                        "[PHASE: installation] [STEP: pipeline] No application pool to stop (pool={})",
                        pool
                    );
                    return Ok(());
                }
                ctx.host.stop_app_pool(pool).await?;
            }
            InstallAction::StartApplicationPool => {
                let pool = vars.application_pool.trim();
                if !pool.is_empty() {
                    ctx.host.start_app_pool(pool).await?;
                }
            }
            InstallAction::Backup => match ctx.backups.backup(vars).await? {
                Some(record) => info!(
                    "[PHASE: installation] [STEP: pipeline] Backup created (root={:?})",
                    record.root
                ),
                None => info!("[PHASE: installation] [STEP: pipeline] Nothing to back up"),
            },
            InstallAction::StopWindowsService => {
                let name = vars.service_name.trim();
                if name.is_empty() || !ctx.host.service_exists(name).await? {
                    return Ok(());
                }
                ctx.host.stop_service(name).await?;
            }
            InstallAction::StartWindowsService => {
                if vars.has_service() {
                    ctx.host.start_service(vars.service_name.trim()).await?;
                }
            }
            InstallAction::InstallWindowsService => {
                if let Some(spec) = ServiceSpec::from_vars(vars) {
                    ctx.host.install_service(&spec).await?;
                }
            }
            InstallAction::RemoveWindowsService => {
                let name = vars.service_name.trim();
                if name.is_empty() || !ctx.host.service_exists(name).await? {
                    return Ok(());
                }
                ctx.host.remove_service(name).await?;
            }
            InstallAction::DeleteDirectory(path) => {
                remove_dir_if_exists(path).await?;
            }
            InstallAction::CopyFiles { from, to } => {
                copy_package(from, to).await?;
            }
            InstallAction::ConfigureWebSite => {
                ctx.host.configure_site(&SiteSpec::from_vars(vars)).await?;
            }
            InstallAction::RemoveWebSite => {
                ctx.host.remove_site(&SiteSpec::from_vars(vars)).await?;
            }
            InstallAction::CreateDatabase => {
                let database = connection_string_database(&vars.connection_string)
                    .ok_or_else(|| SetupError::MissingProperty("DB_DATABASE".to_string()))?;
                let server_conn = vars.install_connection_string.trim();
                if server_conn.is_empty() {
                    return Err(SetupError::MissingProperty("DB_CONN".to_string()).into());
                }
                ensure_database(ctx.db.as_ref(), server_conn, &database).await?;
            }
            InstallAction::RunSqlScript(path) => {
                run_script_file(ctx.db.as_ref(), &vars.connection_string, path).await?;
            }
            InstallAction::RegisterComponent => {
                let mut store = open_main_config(vars).await?;
                store.register_component(vars);
                store.save().await?;
            }
            InstallAction::UnregisterComponent => {
                let mut store = open_main_config(vars).await?;
                if store.unregister_component(&vars.component_id) {
                    store.save().await?;
                } else {
                    debug!(
                        "[PHASE: installation] [STEP: pipeline] Component not registered; nothing to remove (id={})",
                        vars.component_id
                    );
                }
            }
        }
        Ok(())
    }
}

async fn copy_package(from: &Path, to: &Path) -> Result<()> {
    if !tokio::fs::try_exists(from).await.unwrap_or(false) {
        anyhow::bail!("Package folder {:?} does not exist", from);
    }
    tokio::fs::create_dir_all(to)
        .await
        .with_context(|| format!("Failed to create install folder {:?}", to))?;
    let copied = copy_dir_recursive(from, to, "package").await?;
    info!(
        "[PHASE: installation] [STEP: pipeline] Package copied (files={}, to={:?})",
        copied, to
    );
    Ok(())
}

async fn open_main_config(vars: &SetupVariables) -> Result<ConfigValueStore> {
    if vars.main_config.as_os_str().is_empty() {
        return Err(SetupError::MissingProperty("MainConfig".to_string()).into());
    }
    ConfigValueStore::load_or_empty(&vars.main_config).await
}

/// Stop pool, back up, stop the service when the component declares one, delete the install
/// directory. Whether the service step is present is decided here, not when it runs.
pub fn build_prepare_script(vars: &SetupVariables) -> SetupScript {
    let mut script = SetupScript::new(vars.clone());
    script
        .push(InstallAction::StopApplicationPool)
        .push(InstallAction::Backup);
    if vars.has_service() {
        script.push(InstallAction::StopWindowsService);
    }
    script.push(InstallAction::DeleteDirectory(vars.install_folder.clone()));
    script
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::database::connection::testing::StubDbConnector;
    use crate::installation::host::testing::StubHost;
    use crate::installation::progress::RecordingReporter;

    pub struct Harness {
        pub host: Arc<StubHost>,
        pub db: Arc<StubDbConnector>,
        pub reporter: Arc<RecordingReporter>,
        pub ctx: ActionContext,
    }

    pub fn harness(host: StubHost, db: StubDbConnector) -> Harness {
        let host = Arc::new(host);
        let db = Arc::new(db);
        let reporter = Arc::new(RecordingReporter::default());
        let ctx = ActionContext {
            host: host.clone(),
            db: db.clone(),
            backups: BackupRegistry::new("WebsitePanel", "WebsitePanel.Installer.json"),
            progress: Progress::new("test", reporter.clone()),
            cancel: CancelFlag::new(),
        };
        Harness {
            host,
            db,
            reporter,
            ctx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::harness;
    use super::*;
    use crate::database::connection::testing::StubDbConnector;
    use crate::installation::host::testing::StubHost;
    use crate::models::responses::ProgressEvent;

    fn server_vars(root: &Path) -> SetupVariables {
        SetupVariables {
            component_id: "server".into(),
            component_code: "server".into(),
            install_folder: root.join("Server"),
            application_pool: "WebsitePanel Server Pool".into(),
            main_config: root.join("WebsitePanel.Installer.json"),
            ..Default::default()
        }
    }

    #[test]
    fn prepare_without_service_skips_stop_service() {
        let v = server_vars(Path::new("C:\\WebsitePanel"));
        let script = build_prepare_script(&v);
        assert_eq!(
            script.actions(),
            [
                InstallAction::StopApplicationPool,
                InstallAction::Backup,
                InstallAction::DeleteDirectory(v.install_folder.clone()),
            ]
        );
    }

    #[test]
    fn prepare_with_service_stops_it_between_backup_and_delete() {
        let mut v = server_vars(Path::new("C:\\WebsitePanel"));
        v.service_name = "WebsitePanel Scheduler".into();
        let script = build_prepare_script(&v);
        let names: Vec<_> = script.actions().iter().map(InstallAction::name).collect();
        assert_eq!(
            names,
            ["StopApplicationPool", "Backup", "StopWindowsService", "DeleteDirectory"]
        );
    }

    #[tokio::test]
    async fn prepare_on_clean_machine_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let h = harness(StubHost::default(), StubDbConnector::default());
        build_prepare_script(&server_vars(dir.path()))
            .execute(&h.ctx)
            .await
            .expect("idempotent steps");
        // Nothing existed, so nothing was stopped.
        assert!(h.host.calls().is_empty());
    }

    #[tokio::test]
    async fn prepare_backs_up_then_deletes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let v = server_vars(dir.path());
        tokio::fs::create_dir_all(&v.install_folder).await.expect("mkdir");
        tokio::fs::write(v.install_folder.join("web.config"), b"<configuration/>")
            .await
            .expect("write");

        let h = harness(
            StubHost::default().with_pool("WebsitePanel Server Pool"),
            StubDbConnector::default(),
        );
        build_prepare_script(&v).execute(&h.ctx).await.expect("prepare");

        assert_eq!(h.host.calls(), vec!["stop_pool:WebsitePanel Server Pool"]);
        assert!(!v.install_folder.exists());
        let found = h
            .ctx
            .backups
            .find(dir.path(), "Server")
            .await
            .expect("find")
            .expect("backup exists");
        assert!(found.root.join("files").join("web.config").exists());
    }

    #[tokio::test]
    async fn first_failure_stops_the_script() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut v = server_vars(dir.path());
        v.service_name = "svc".into();
        let h = harness(
            StubHost::default()
                .with_pool("WebsitePanel Server Pool")
                .with_service("svc")
                .failing_on("stop_pool"),
            StubDbConnector::default(),
        );
        let err = build_prepare_script(&v).execute(&h.ctx).await.expect_err("fails");
        assert!(format!("{:#}", err).contains("StopApplicationPool"));
        assert_eq!(h.host.calls(), vec!["stop_pool:WebsitePanel Server Pool"]);
        let increments = h
            .reporter
            .events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Increment { .. }))
            .count();
        assert_eq!(increments, 0);
    }

    #[tokio::test]
    async fn cancellation_is_checked_between_actions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let h = harness(StubHost::default(), StubDbConnector::default());
        h.ctx.cancel.cancel();
        let err = build_prepare_script(&server_vars(dir.path()))
            .execute(&h.ctx)
            .await
            .expect_err("cancelled");
        assert_eq!(err.downcast_ref::<SetupError>(), Some(&SetupError::Cancelled));
    }

    #[tokio::test]
    async fn progress_resets_then_labels_and_counts_each_action() {
        let dir = tempfile::tempdir().expect("tempdir");
        let h = harness(StubHost::default(), StubDbConnector::default());
        build_prepare_script(&server_vars(dir.path()))
            .execute(&h.ctx)
            .await
            .expect("prepare");
        let events = h.reporter.events();
        assert!(matches!(events[0], ProgressEvent::Reset { total: 3, .. }));
        assert!(matches!(
            &events[1],
            ProgressEvent::ActionText { action, .. } if action == "StopApplicationPool"
        ));
        assert!(matches!(events[2], ProgressEvent::Increment { by: 1, .. }));
        assert_eq!(events.len(), 1 + 3 * 2);
    }

    #[tokio::test]
    async fn register_and_unregister_round_trip_main_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut v = server_vars(dir.path());
        v.target_version = "2.1.0".into();
        let h = harness(StubHost::default(), StubDbConnector::default());

        let mut script = SetupScript::new(v.clone());
        script.push(InstallAction::RegisterComponent);
        script.execute(&h.ctx).await.expect("register");
        let store = ConfigValueStore::load(&v.main_config).await.expect("load");
        assert_eq!(store.component_id("server").as_deref(), Some("server"));
        assert_eq!(store.setting("server", "Release").as_deref(), Some("2.1.0"));

        let mut script = SetupScript::new(v.clone());
        script.push(InstallAction::UnregisterComponent);
        script.execute(&h.ctx).await.expect("unregister");
        let store = ConfigValueStore::load(&v.main_config).await.expect("load");
        assert!(store.components().is_empty());
    }

    #[tokio::test]
    async fn create_database_uses_server_connection() {
        let v = SetupVariables {
            component_code: "enterpriseserver".into(),
            connection_string: "Server=sql01;Database=WebsitePanel;Integrated Security=SSPI;".into(),
            install_connection_string: "Server=sql01;Database=master;Integrated Security=SSPI;".into(),
            ..Default::default()
        };
        let h = harness(StubHost::default(), StubDbConnector::reachable());
        let mut script = SetupScript::new(v);
        script.push(InstallAction::CreateDatabase);
        script.execute(&h.ctx).await.expect("create");
        assert_eq!(
            *h.db.executed.lock().expect("lock"),
            vec!["IF DB_ID(N'WebsitePanel') IS NULL CREATE DATABASE [WebsitePanel]".to_string()]
        );
    }

    #[tokio::test]
    async fn version_guard_action_blocks_downgrade() {
        let v = SetupVariables {
            version: "2.2.0".into(),
            target_version: "2.1.0".into(),
            ..Default::default()
        };
        let h = harness(StubHost::default(), StubDbConnector::default());
        let mut script = SetupScript::new(v);
        script.push(InstallAction::VersionGuard);
        let err = script.execute(&h.ctx).await.expect_err("guard");
        assert!(crate::models::errors::is_declared(&err));
    }
}
