//! Internal utilities to support testing of the hub workspace.
//!
//! Nothing in here is public API in any form.

pub mod factory;
pub mod logging;
