pub mod initialization;
pub mod manager;
pub mod managers;
pub mod worker;
