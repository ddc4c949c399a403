pub mod assembler;
pub mod catalog;
pub mod collection_fetcher;
pub mod command;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod naming;
pub mod planner;
pub mod segment_fetcher;
pub mod store;
