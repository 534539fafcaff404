pub mod clock;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod format;
pub mod listing;
pub mod media;
