// Windows service management
//
// State queries and stop go through the Service Control Manager (`windows-service`), so a
// stop can wait for the service to actually reach STOPPED. Create/start/delete use `sc.exe`.

#![cfg_attr(not(windows), allow(dead_code, unused_imports))]

use anyhow::Result;
use log::{debug, info, warn};
use std::time::Instant;
use tokio::time::Duration;

use crate::installation::host::ServiceSpec;

/// `ERROR_SERVICE_DOES_NOT_EXIST`
pub const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
/// `ERROR_SERVICE_ALREADY_RUNNING`
pub const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;
/// `ERROR_SERVICE_MARKED_FOR_DELETE`
pub const ERROR_SERVICE_MARKED_FOR_DELETE: i32 = 1072;

const SC_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_WAIT: Duration = Duration::from_secs(60);

/// Arguments for `sc.exe create`.
///
/// sc.exe requires a space after `key=`, so each key and its value are separate arguments.
pub fn build_sc_create_args(spec: &ServiceSpec) -> Result<Vec<String>> {
    let exe = spec
        .binary
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Service binary path is not valid UTF-8"))?;

    let mut args = vec![
        "create".to_string(),
        spec.name.clone(),
        "binPath=".to_string(),
        format!("\"{}\"", exe),
        "start=".to_string(),
        "auto".to_string(),
        "DisplayName=".to_string(),
        spec.display_name.clone(),
    ];
    if let Some(id) = spec.identity.as_ref() {
        args.push("obj=".to_string());
        args.push(id.qualified_name());
        args.push("password=".to_string());
        args.push(id.password.clone());
    }
    Ok(args)
}

/// True when an `sc.exe` exit code means "nothing to do".
pub fn sc_exit_is_benign(op: &str, code: Option<i32>) -> bool {
    match (op, code) {
        (_, Some(0)) => true,
        ("delete", Some(ERROR_SERVICE_DOES_NOT_EXIST | ERROR_SERVICE_MARKED_FOR_DELETE)) => true,
        ("start", Some(ERROR_SERVICE_ALREADY_RUNNING)) => true,
        _ => false,
    }
}

#[cfg(windows)]
mod scm {
    use super::*;
    use windows_service::service::{ServiceAccess, ServiceState};
    use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

    fn is_missing(err: &windows_service::Error) -> bool {
        matches!(err, windows_service::Error::Winapi(e)
            if e.raw_os_error() == Some(ERROR_SERVICE_DOES_NOT_EXIST))
    }

    /// Current state, or `None` when the service is not registered.
    pub fn query_state(name: &str) -> Result<Option<ServiceState>> {
        let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
        let service = match manager.open_service(name, ServiceAccess::QUERY_STATUS) {
            Ok(s) => s,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(service.query_status()?.current_state))
    }

    /// Ask the service to stop and wait until it reports STOPPED.
    pub fn stop_and_wait(name: &str, wait: Duration) -> Result<()> {
        let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
        let service = match manager
            .open_service(name, ServiceAccess::QUERY_STATUS | ServiceAccess::STOP)
        {
            Ok(s) => s,
            Err(e) if is_missing(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let state = service.query_status()?.current_state;
        if state == ServiceState::Stopped {
            return Ok(());
        }
        if state != ServiceState::StopPending {
            service.stop()?;
        }

        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            if service.query_status()?.current_state == ServiceState::Stopped {
                return Ok(());
            }
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
        anyhow::bail!("Service '{}' did not stop within {}s", name, wait.as_secs())
    }

    pub fn is_running(name: &str) -> Result<bool> {
        Ok(query_state(name)? == Some(ServiceState::Running))
    }
}

#[cfg(windows)]
pub async fn windows_service_exists(name: &str) -> Result<bool> {
    let owned = name.to_string();
    let state = tokio::task::spawn_blocking(move || scm::query_state(&owned)).await??;
    Ok(state.is_some())
}

/// Stop a Windows service. A service that is missing or already stopped is a success.
#[cfg(windows)]
pub async fn stop_windows_service(name: &str) -> Result<()> {
    let started = Instant::now();
    info!(
        "[PHASE: installation] [STEP: service] stop_windows_service entered (service_name={})",
        name
    );
    let owned = name.to_string();
    tokio::task::spawn_blocking(move || scm::stop_and_wait(&owned, STOP_WAIT)).await??;
    info!(
        "[PHASE: installation] [STEP: service] stop_windows_service exit (service_name={}, duration_ms={})",
        name,
        started.elapsed().as_millis()
    );
    Ok(())
}

#[cfg(windows)]
pub async fn start_windows_service(name: &str) -> Result<()> {
    let started = Instant::now();
    let out = crate::installation::run_cmd_with_timeout(
        "sc.exe",
        &["start".to_string(), name.to_string()],
        SC_TIMEOUT,
        "sc_start",
    )
    .await?;
    if !sc_exit_is_benign("start", out.exit_code) {
        warn!(
            "[PHASE: installation] [STEP: service] sc.exe start failed (exit_code={:?}) stdout={}",
            out.exit_code,
            out.stdout.trim()
        );
        anyhow::bail!("Windows service '{}' failed to start (exit_code={:?})", name, out.exit_code);
    }

    let owned = name.to_string();
    let deadline = Instant::now() + STOP_WAIT;
    loop {
        let probe = owned.clone();
        if tokio::task::spawn_blocking(move || scm::is_running(&probe)).await?? {
            break;
        }
        if Instant::now() >= deadline {
            anyhow::bail!("Windows service '{}' is not running after start", name);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    info!(
        "[PHASE: installation] [STEP: service] start_windows_service exit ok (service_name={}, duration_ms={})",
        name,
        started.elapsed().as_millis()
    );
    Ok(())
}

/// Register a service, replacing any previous registration with the same name.
#[cfg(windows)]
pub async fn create_windows_service(spec: &ServiceSpec) -> Result<()> {
    let started = Instant::now();
    debug!(
        "[PHASE: installation] [STEP: service] create_windows_service entered (service_name={}, binary={:?})",
        spec.name, spec.binary
    );

    if windows_service_exists(&spec.name).await? {
        stop_windows_service(&spec.name).await?;
        delete_windows_service(&spec.name).await?;
    }

    let args = build_sc_create_args(spec)?;
    let out = crate::installation::run_cmd_with_timeout("sc.exe", &args, SC_TIMEOUT, "sc_create").await?;
    if !sc_exit_is_benign("create", out.exit_code) {
        warn!(
            "[PHASE: installation] [STEP: service] sc.exe create failed (exit_code={:?}) stdout={}",
            out.exit_code,
            out.stdout.trim()
        );
        anyhow::bail!("Windows service creation failed (exit_code={:?})", out.exit_code);
    }

    info!(
        "[PHASE: installation] [STEP: service] create_windows_service exit ok (service_name={}, duration_ms={})",
        spec.name,
        started.elapsed().as_millis()
    );
    Ok(())
}

#[cfg(windows)]
pub async fn delete_windows_service(name: &str) -> Result<()> {
    let out = crate::installation::run_cmd_with_timeout(
        "sc.exe",
        &["delete".to_string(), name.to_string()],
        SC_TIMEOUT,
        "sc_delete",
    )
    .await?;
    if !sc_exit_is_benign("delete", out.exit_code) {
        anyhow::bail!("Windows service '{}' deletion failed (exit_code={:?})", name, out.exit_code);
    }
    debug!(
        "[PHASE: installation] [STEP: service] delete_windows_service exit (service_name={}, exit_code={:?})",
        name, out.exit_code
    );
    Ok(())
}
