pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod identity;
pub mod jinko;
pub mod merge;
pub mod metadata;
pub mod output;
pub mod reshape;
pub mod store;
