pub mod app;
pub mod changelog;
pub mod cleanup;
pub mod config;
pub mod diff;
pub mod domain;
pub mod error;
pub mod feed;
pub mod fs_util;
pub mod graph;
pub mod index;
pub mod output;
pub mod reconcile;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod store;
