pub mod group_status;
