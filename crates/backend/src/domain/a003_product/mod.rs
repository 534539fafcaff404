pub mod catalog;
pub mod repository;
