pub mod file;
pub mod format;
pub mod keys;
pub mod manager;
pub mod memory;
pub mod traits;
