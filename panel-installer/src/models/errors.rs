// Declared setup failures.
//
// These are the failures a workflow raises on purpose. The dispatcher logs them without a
// backtrace; anything else reaching it is treated as an unexpected fault.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("New version must be greater than previous always (installed {found}, target {target}).")]
    VersionGuard { found: String, target: String },

    #[error("Install tool for components is not found.")]
    InstallToolNotFound,

    #[error("Required property '{0}' is missing.")]
    MissingProperty(String),

    #[error("Component '{0}' is not registered in the main configuration.")]
    ComponentNotRegistered(String),

    #[error("Operation cancelled.")]
    Cancelled,

    #[error("{0} is not supported on this host.")]
    Unsupported(String),
}

/// True when `err` (or anything in its chain) is a declared setup failure.
pub fn is_declared(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<SetupError>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn declared_errors_survive_context_wrapping() {
        let err = Err::<(), _>(SetupError::Cancelled)
            .context("running maintain pipeline")
            .unwrap_err();
        assert!(is_declared(&err));
    }

    #[test]
    fn io_errors_are_not_declared() {
        let err = anyhow::Error::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk on fire",
        ));
        assert!(!is_declared(&err));
    }
}
