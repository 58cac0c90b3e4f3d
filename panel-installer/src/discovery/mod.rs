// Discovery of previous installations: main configuration search, settings, versions.

pub mod config_store;
pub mod locator;
pub mod version;
