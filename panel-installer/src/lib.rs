// WebsitePanel installer engine
// Library entry point: logging, runtime and the host-facing runners behind the CLI.

pub mod api;
pub mod database;
pub mod discovery;
pub mod installation;
pub mod models;
pub mod security;
pub mod utils;

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::path::{Path, PathBuf};

use crate::api::{Engine, ImmediateAction};
use crate::installation::pipeline::CancelFlag;
use crate::installation::workflows::{SetupOperation, WorkflowRegistry};
use crate::models::bag::PropertyBag;
use crate::models::components::ComponentKind;
use crate::models::requests::DeferredRequest;
use crate::models::responses::ActionResult;
use crate::utils::settings::EngineSettings;

/// One JSON log record with `phase`/`step` lifted out of the message tags.
fn json_log_line(level: log::Level, target: &str, message: &str) -> String {
    let timestamp_utc = chrono::Utc::now().to_rfc3339();
    let (phase, step, cleaned_message) = utils::logging::parse_log_metadata(message);
    utils::logging::format_json_log(
        &timestamp_utc,
        level,
        target,
        &cleaned_message,
        phase.as_deref(),
        step.as_deref(),
    )
}

fn text_log_line(level: log::Level, target: &str, message: &str) -> String {
    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let (phase, step, cleaned_message) = utils::logging::parse_log_metadata(message);
    utils::logging::format_human_readable_log(
        &timestamp_local.to_string(),
        level,
        target,
        &cleaned_message,
        phase.as_deref(),
        step.as_deref(),
    )
}

/// Initialize logging with dual format (JSON + human-readable).
///
/// Stdout belongs to the progress protocol, so the optional console copy goes to stderr.
fn init_logging(settings: &EngineSettings, with_stderr: bool) -> Result<PathBuf> {
    let log_dir = utils::path_resolver::resolve_log_folder(settings)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");
    let json_log_file = log_dir.join(format!("panel-installer-{}.log", timestamp));
    let txt_log_file = log_dir.join(format!("panel-installer-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new().level(log::LevelFilter::Debug);

    if with_stderr {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let line = text_log_line(record.level(), record.target(), &message.to_string());
                    out.finish(format_args!("{}", line));
                })
                .chain(std::io::stderr()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let line = json_log_line(record.level(), record.target(), &message.to_string());
                    out.finish(format_args!("{}\n", line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let line = text_log_line(record.level(), record.target(), &message.to_string());
                    out.finish(format_args!("{}\n", line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(log_dir)
}

/// Options shared by every runner.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit settings file; otherwise `panel-installer.toml` next to the executable.
    pub settings: Option<PathBuf>,
    /// Copy log lines to stderr.
    pub verbose: bool,
}

fn start(opts: &RunOptions, what: &str) -> Result<(Engine, tokio::runtime::Runtime)> {
    let settings = EngineSettings::load(opts.settings.as_deref())?;
    if let Err(e) = init_logging(&settings, opts.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!(
        "[PHASE: initialization] {} starting at {} (version={}, os={:?}, product_name={})",
        what,
        chrono::Utc::now(),
        env!("CARGO_PKG_VERSION"),
        utils::os_detection::detect_os(),
        settings.product_name
    );

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;
    Ok((Engine::new(settings), rt))
}

/// Ctrl+C flips the cancel flag; the pipeline stops between actions.
fn cancel_on_interrupt(rt: &tokio::runtime::Runtime) -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[PHASE: deferred] [STEP: cancel] Interrupt received, cancelling after the current action");
            flag.cancel();
        }
    });
    cancel
}

fn exit_code_of(what: &str, result: Result<ActionResult>) -> i32 {
    match result {
        Ok(res) => res.exit_code(),
        Err(e) => {
            error!("[PHASE: initialization] [STEP: {}] Runner failed: {:?}", what, e);
            eprintln!("Installer error: {:#}", e);
            ActionResult::Failure.exit_code()
        }
    }
}

/// A missing bag file is an empty bag; the host may start from nothing.
async fn read_bag(path: &Path) -> Result<PropertyBag> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if text.trim().is_empty() => Ok(PropertyBag::new()),
        Ok(text) => serde_json::from_str(&text)
            .with_context(|| format!("Property bag {:?} is not valid JSON", path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PropertyBag::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read property bag {:?}", path)),
    }
}

async fn write_bag(path: &Path, bag: &PropertyBag) -> Result<()> {
    let text = serde_json::to_string_pretty(bag).context("Failed to serialize property bag")?;
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("Failed to write property bag {:?}", path))
}

async fn read_payload(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read deferred payload {:?}", path))
}

async fn immediate_on_file(engine: &Engine, action: ImmediateAction, bag_path: &Path) -> Result<ActionResult> {
    let mut bag = read_bag(bag_path).await?;
    let res = api::run_immediate(engine, action, &mut bag).await;
    write_bag(bag_path, &bag).await?;
    Ok(res)
}

async fn payload_to_file(component: ComponentKind, bag_path: &Path, out: &Path) -> Result<ActionResult> {
    let bag = read_bag(bag_path).await?;
    let request = DeferredRequest::for_component(component, &bag);
    tokio::fs::write(out, request.to_payload()?)
        .await
        .with_context(|| format!("Failed to write deferred payload {:?}", out))?;
    info!(
        "[PHASE: immediate] [STEP: payload] Deferred payload written (component={}, correlation_id={}, keys={})",
        component,
        request.correlation_id,
        request.data.iter().count()
    );
    Ok(ActionResult::Success)
}

/// Run one immediate-phase action against the bag stored in `bag_path`, writing it back.
pub fn run_immediate_file(opts: &RunOptions, action: ImmediateAction, bag_path: &Path) -> i32 {
    let result = start(opts, "Immediate action").and_then(|(engine, rt)| {
        rt.block_on(immediate_on_file(&engine, action, bag_path))
    });
    exit_code_of("immediate", result)
}

/// Serialize the deferred payload of `component` from the bag in `bag_path`.
pub fn run_write_payload(opts: &RunOptions, component: ComponentKind, bag_path: &Path, out: &Path) -> i32 {
    let result = start(opts, "Payload writer").and_then(|(_, rt)| {
        rt.block_on(payload_to_file(component, bag_path, out))
    });
    exit_code_of("payload", result)
}

pub fn run_deferred(opts: &RunOptions, op: SetupOperation, component: ComponentKind, payload_path: &Path) -> i32 {
    let result = start(opts, "Deferred workflow").and_then(|(engine, rt)| {
        let cancel = cancel_on_interrupt(&rt);
        let registry = WorkflowRegistry::standard();
        rt.block_on(async {
            let payload = read_payload(payload_path).await?;
            Ok::<_, anyhow::Error>(
                api::deferred::dispatch(&engine, &registry, op, component, &payload, cancel).await,
            )
        })
    });
    exit_code_of("deferred", result)
}

pub fn run_prepare(opts: &RunOptions, payload_path: &Path) -> i32 {
    let result = start(opts, "Prepare").and_then(|(engine, rt)| {
        let cancel = cancel_on_interrupt(&rt);
        rt.block_on(async {
            let payload = read_payload(payload_path).await?;
            Ok::<_, anyhow::Error>(api::deferred::prepare(&engine, &payload, cancel).await)
        })
    });
    exit_code_of("prepare", result)
}

pub fn run_web_features(opts: &RunOptions, payload_path: &Path) -> i32 {
    let result = start(opts, "Web feature installation").and_then(|(engine, rt)| {
        rt.block_on(async {
            let payload = read_payload(payload_path).await?;
            Ok::<_, anyhow::Error>(api::deferred::install_web_features_deferred(&engine, &payload).await)
        })
    });
    exit_code_of("web_features", result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_or_blank_bag_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bag.json");
        assert_eq!(read_bag(&path).await.expect("missing"), PropertyBag::new());

        tokio::fs::write(&path, "  \n").await.expect("write");
        assert_eq!(read_bag(&path).await.expect("blank"), PropertyBag::new());

        tokio::fs::write(&path, "{ not json").await.expect("write");
        assert!(read_bag(&path).await.is_err());
    }

    #[tokio::test]
    async fn bag_survives_a_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bag.json");
        let mut bag = PropertyBag::from_pairs([("DB_SERVER", "SQL01")]);
        bag.add_option("PI_SERVER_IP", "127.0.0.1");
        bag.add_check("REQCHECKLIST", true, "IIS 7 or later");

        write_bag(&path, &bag).await.expect("write");
        assert_eq!(read_bag(&path).await.expect("read"), bag);
    }

    #[tokio::test]
    async fn payload_file_carries_component_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bag_path = dir.path().join("bag.json");
        let out = dir.path().join("payload.json");
        let bag = PropertyBag::from_pairs([
            ("PI_PORTAL_IP", "10.0.0.5"),
            ("PI_SERVER_IP", "10.0.0.6"),
            ("COMPFOUND_PORTAL_ID", "portal1"),
        ]);
        write_bag(&bag_path, &bag).await.expect("write");

        let res = payload_to_file(ComponentKind::Portal, &bag_path, &out).await.expect("payload");
        assert!(res.is_success());

        let text = tokio::fs::read_to_string(&out).await.expect("read");
        let request = DeferredRequest::from_payload(&text).expect("parse");
        assert_eq!(request.data.get("PI_PORTAL_IP"), "10.0.0.5");
        assert!(!request.data.contains("PI_SERVER_IP"));
        assert_eq!(request.data.get("ComponentId"), "portal1");
    }

    #[test]
    fn json_record_lifts_phase_and_step() {
        let line = json_log_line(
            log::Level::Info,
            "panel_installer::api",
            "[PHASE: deferred] [STEP: prepare] prepare entered",
        );
        let v: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(v["level"], "INFO");
        assert_eq!(v["phase"], "deferred");
        assert_eq!(v["step"], "prepare");
        assert_eq!(v["message"], "prepare entered");

        let text = text_log_line(log::Level::Warn, "t", "[PHASE: immediate] plain");
        assert!(text.contains("[WARN] [PHASE: immediate] [t] plain"), "{}", text);
    }

    #[test]
    fn runner_errors_map_to_failure_code() {
        assert_eq!(exit_code_of("t", Ok(ActionResult::Success)), 0);
        assert_eq!(exit_code_of("t", Ok(ActionResult::Failure)), 1);
        assert_eq!(exit_code_of("t", Err(anyhow::anyhow!("boom"))), 1);
    }
}
