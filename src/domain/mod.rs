//! Platform independent core: report model, edge detection, bindings,
//! key dispatch and the connection lifecycle.

pub mod connection;
pub mod dispatcher;
pub mod edge;
pub mod mapping;
pub mod models;
pub mod settings;
