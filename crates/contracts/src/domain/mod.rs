pub mod a001_group;
pub mod a002_store;
pub mod a003_product;
pub mod common;
