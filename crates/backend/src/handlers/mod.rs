pub mod a001_group;
