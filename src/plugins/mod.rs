pub mod fs;
pub mod http;
pub mod memory;
pub mod registry;
