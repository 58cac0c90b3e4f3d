// Deferred (elevated) entry points
//
// The only input is the serialized DeferredRequest. Workflows come from the registry; failures
// are classified once here. Declared setup failures are expected outcomes and log at info;
// anything else logs with full detail. Both report Failure to the host.

use anyhow::{Context, Result};
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;

use crate::api::Engine;
use crate::discovery::config_store::ConfigValueStore;
use crate::installation::pipeline::{build_prepare_script, CancelFlag};
use crate::installation::web_features::{install_web_features, WebFeatureSelection};
use crate::installation::workflows::{resolve_variables, SetupOperation, WorkflowRegistry};
use crate::models::components::ComponentKind;
use crate::models::errors::{is_declared, SetupError};
use crate::models::requests::DeferredRequest;
use crate::models::responses::ActionResult;
use crate::models::variables::SetupVariables;

fn classify(what: &str, started: Instant, result: Result<()>) -> ActionResult {
    match result {
        Ok(()) => {
            info!(
                "[PHASE: deferred] [STEP: {}] Completed (duration_ms={})",
                what,
                started.elapsed().as_millis()
            );
            ActionResult::Success
        }
        Err(e) if is_declared(&e) => {
            info!(
                "[PHASE: deferred] [STEP: {}] Expected exception: {:#}",
                what, e
            );
            ActionResult::Failure
        }
        Err(e) => {
            error!(
                "[PHASE: deferred] [STEP: {}] Unexpected failure (duration_ms={}): {:?}",
                what,
                started.elapsed().as_millis(),
                e
            );
            ActionResult::Failure
        }
    }
}

/// Run the workflow registered for (`kind`, `op`) against the request in `payload`.
pub async fn dispatch(
    engine: &Engine,
    registry: &WorkflowRegistry,
    op: SetupOperation,
    kind: ComponentKind,
    payload: &str,
    cancel: CancelFlag,
) -> ActionResult {
    let started = Instant::now();
    info!(
        "[PHASE: deferred] [STEP: dispatch] dispatch entered (operation={}, component={})",
        op, kind
    );
    let result = run_workflow(engine, registry, op, kind, payload, cancel, started).await;
    classify("dispatch", started, result)
}

async fn run_workflow(
    engine: &Engine,
    registry: &WorkflowRegistry,
    op: SetupOperation,
    kind: ComponentKind,
    payload: &str,
    cancel: CancelFlag,
    started: Instant,
) -> Result<()> {
    let request = DeferredRequest::from_payload(payload)?;
    let builder = registry
        .builder(kind, op)
        .ok_or_else(|| anyhow::anyhow!("No workflow registered for {} {}", kind, op))?;
    let vars = resolve_variables(kind, op, &request.data, &engine.settings).await?;
    let script = builder(&vars)?;
    let ctx = engine.action_context(&request.correlation_id, cancel);
    let outcome = script.execute(&ctx).await;
    if let Err(e) = &outcome {
        ctx.progress.error(format!("{:#}", e), Some(started.elapsed().as_millis()));
    }
    outcome
}

/// Variables for the prepare pipeline, taken from the installation the immediate phase found.
///
/// `None` when the request names no previous installation.
pub async fn prepare_variables(engine: &Engine, request: &DeferredRequest) -> Result<Option<SetupVariables>> {
    let bag = &request.data;
    let (Some(main_config), Some(id)) = (bag.get_non_blank("MainConfig"), bag.get_non_blank("ComponentId")) else {
        return Ok(None);
    };
    let main_config = PathBuf::from(main_config.trim());
    let store = ConfigValueStore::load(&main_config).await?;

    let mut vars = SetupVariables {
        component_id: id.trim().to_string(),
        main_config: main_config.clone(),
        target_version: bag.get("ProductVersion").trim().to_string(),
        ..Default::default()
    };
    store.load_component_settings(&mut vars)?;
    if vars.kind().is_none() {
        return Err(SetupError::ComponentNotRegistered(vars.component_code.clone()).into());
    }

    // A main config found inside a backup may carry a different name than the live one.
    if let Some(name) = main_config.file_name() {
        vars.file_name_map.insert(
            name.to_string_lossy().to_string(),
            engine.settings.main_config_name.clone(),
        );
    }
    Ok(Some(vars))
}

/// Stop, back up and clear a previous installation before the new files are laid down.
pub async fn prepare(engine: &Engine, payload: &str, cancel: CancelFlag) -> ActionResult {
    let started = Instant::now();
    info!("[PHASE: deferred] [STEP: prepare] prepare entered");
    let result = run_prepare(engine, payload, cancel).await;
    classify("prepare", started, result)
}

async fn run_prepare(engine: &Engine, payload: &str, cancel: CancelFlag) -> Result<()> {
    let request = DeferredRequest::from_payload(payload)?;
    let Some(vars) = prepare_variables(engine, &request)
        .await
        .context("Failed to read the previous installation")?
    else {
        info!("[PHASE: deferred] [STEP: prepare] No previous installation; nothing to prepare");
        return Ok(());
    };
    build_prepare_script(&vars)
        .execute(&engine.action_context(&request.correlation_id, cancel))
        .await
}

pub async fn install_web_features_deferred(engine: &Engine, payload: &str) -> ActionResult {
    let started = Instant::now();
    let result = run_web_features(engine, payload).await;
    classify("web_features", started, result)
}

async fn run_web_features(engine: &Engine, payload: &str) -> Result<()> {
    let request = DeferredRequest::from_payload(payload)?;
    let selection = WebFeatureSelection::from_bag(&request.data);
    let progress = engine.progress(&request.correlation_id);
    install_web_features(engine.host.as_ref(), &progress, selection).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::engine;
    use crate::database::connection::testing::StubDbConnector;
    use crate::installation::host::testing::{StubHost, StubProbe};
    use crate::models::bag::PropertyBag;
    use crate::models::responses::ProgressEvent;
    use serde_json::json;
    use std::path::Path;

    fn payload(pairs: Vec<(&str, String)>) -> String {
        DeferredRequest {
            correlation_id: "corr-1".into(),
            data: PropertyBag::from_pairs(pairs),
        }
        .to_payload()
        .expect("payload")
    }

    async fn installed_portal(root: &Path, release: &str) -> PathBuf {
        let install = root.join("Portal");
        tokio::fs::create_dir_all(&install).await.expect("mkdir");
        tokio::fs::write(install.join("default.aspx"), "<%@ Page %>").await.expect("write");
        let cfg = root.join("WebsitePanel.Installer.json");
        let doc = json!({
            "components": [{
                "id": "portal1",
                "settings": {
                    "ComponentCode": "portal",
                    "Release": release,
                    "InstallFolder": install.to_string_lossy(),
                    "ApplicationPool": "WebsitePanel Portal Pool"
                }
            }]
        });
        tokio::fs::write(&cfg, doc.to_string()).await.expect("write");
        cfg
    }

    #[tokio::test]
    async fn garbage_payload_is_unexpected_failure() {
        let t = engine(StubHost::default(), StubProbe::default(), StubDbConnector::default());
        let res = dispatch(
            &t.engine,
            &WorkflowRegistry::standard(),
            SetupOperation::Install,
            ComponentKind::Portal,
            "not json",
            CancelFlag::new(),
        )
        .await;
        assert_eq!(res, ActionResult::Failure);
    }

    #[tokio::test]
    async fn remove_runs_registered_workflow() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cfg = installed_portal(tmp.path(), "2.0.0").await;
        let t = engine(
            StubHost::default().with_pool("WebsitePanel Portal Pool"),
            StubProbe::default(),
            StubDbConnector::default(),
        );
        let body = payload(vec![
            ("WSP_INSTALL_DIR", tmp.path().to_string_lossy().to_string()),
            ("MainConfig", cfg.to_string_lossy().to_string()),
        ]);

        let res = dispatch(
            &t.engine,
            &WorkflowRegistry::standard(),
            SetupOperation::Remove,
            ComponentKind::Portal,
            &body,
            CancelFlag::new(),
        )
        .await;

        assert_eq!(res, ActionResult::Success);
        assert!(!tmp.path().join("Portal").exists());
        let store = ConfigValueStore::load(&cfg).await.expect("load");
        assert!(store.components().is_empty());
        assert_eq!(t.host.calls().first().map(String::as_str), Some("stop_pool:WebsitePanel Portal Pool"));
    }

    #[tokio::test]
    async fn cancelled_run_fails_and_reports() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cfg = installed_portal(tmp.path(), "2.0.0").await;
        let t = engine(StubHost::default(), StubProbe::default(), StubDbConnector::default());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let res = dispatch(
            &t.engine,
            &WorkflowRegistry::standard(),
            SetupOperation::Remove,
            ComponentKind::Portal,
            &payload(vec![
                ("WSP_INSTALL_DIR", tmp.path().to_string_lossy().to_string()),
                ("MainConfig", cfg.to_string_lossy().to_string()),
            ]),
            cancel,
        )
        .await;

        assert_eq!(res, ActionResult::Failure);
        assert!(tmp.path().join("Portal").exists());
        assert!(t
            .reporter
            .events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::Error { correlation_id, .. } if correlation_id == "corr-1")));
    }

    #[tokio::test]
    async fn prepare_without_previous_install_is_a_no_op() {
        let t = engine(StubHost::default(), StubProbe::default(), StubDbConnector::default());
        let res = prepare(&t.engine, &payload(vec![]), CancelFlag::new()).await;
        assert_eq!(res, ActionResult::Success);
        assert!(t.host.calls().is_empty());
    }

    #[tokio::test]
    async fn prepare_backs_up_and_clears_previous_install() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cfg = installed_portal(tmp.path(), "2.0.0").await;
        let t = engine(StubHost::default(), StubProbe::default(), StubDbConnector::default());

        let res = prepare(
            &t.engine,
            &payload(vec![
                ("MainConfig", cfg.to_string_lossy().to_string()),
                ("ComponentId", "portal1".to_string()),
            ]),
            CancelFlag::new(),
        )
        .await;

        assert_eq!(res, ActionResult::Success);
        assert!(!tmp.path().join("Portal").exists());
        let backup = t
            .engine
            .action_context("x", CancelFlag::new())
            .backups
            .find(tmp.path(), "Portal")
            .await
            .expect("find")
            .expect("record");
        assert!(backup.root.join("files").join("default.aspx").exists());
        assert_eq!(backup.version, "2.0.0");
    }

    #[tokio::test]
    async fn failed_feature_still_resets_progress() {
        let t = engine(
            StubHost::default().failing_on("install_feature"),
            StubProbe::default(),
            StubDbConnector::default(),
        );
        let res = install_web_features_deferred(&t.engine, &payload(vec![])).await;
        assert_eq!(res, ActionResult::Failure);
        assert!(matches!(
            t.reporter.events().last(),
            Some(ProgressEvent::Reset { .. })
        ));
    }
}
