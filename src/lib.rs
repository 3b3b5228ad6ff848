pub mod audio;
pub mod config;
pub mod domain;
pub mod download;
pub mod enumerate;
pub mod error;
pub mod fallback;
pub mod merge;
pub mod onc;
pub mod output;
pub mod store;
