pub mod bag;
pub mod components;
pub mod errors;
pub mod requests;
pub mod responses;
pub mod variables;
