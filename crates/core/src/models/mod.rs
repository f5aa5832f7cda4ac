pub mod event;
pub mod lesson;
pub mod message;
pub mod portfolio;
pub mod settings;
pub mod stock;
pub mod summary;
pub mod transaction;
