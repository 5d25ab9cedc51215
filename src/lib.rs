pub mod config;
pub mod datetime;
pub mod error;
pub mod fetch;
pub mod harness;
pub mod html;
pub mod listing;
pub mod model;
pub mod notify;
pub mod phases;
pub mod pipeline;
pub mod store;
