pub mod attachments;
pub mod auth;
pub mod client;
pub mod config;
pub mod markup;
pub mod mirror;
pub mod page;
pub mod runtime;
pub mod status;
pub mod storage;
pub mod toc;
pub mod tree;
