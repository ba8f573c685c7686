pub mod comm;
pub mod config;
pub mod consts;
pub mod device;
pub mod idstore;
pub mod mqtt;
pub mod ouman;
pub mod vallox;
