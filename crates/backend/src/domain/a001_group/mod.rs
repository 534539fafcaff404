pub mod invite;
pub mod join;
pub mod policy;
pub mod repository;
pub mod service;
pub mod sweep;
