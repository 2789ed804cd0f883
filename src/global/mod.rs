//! Per-user directories kindly installs into and reads configuration from.

pub mod utils;
