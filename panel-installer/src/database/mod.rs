pub mod connection;
pub mod discovery;
pub mod legacy_password;
pub mod scripts;
