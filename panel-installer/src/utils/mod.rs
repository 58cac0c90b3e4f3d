pub mod logging;
pub mod os_detection;
pub mod paired_values;
pub mod path_resolver;
pub mod settings;
pub mod validation;
