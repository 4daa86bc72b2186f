pub mod commenter;
pub mod config;
pub mod daemon;
pub mod error;
pub mod message;
pub mod naming;
pub mod notify;
pub mod pair;
pub mod reconcile;
pub mod repo;
pub mod review;
