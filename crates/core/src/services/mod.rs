pub mod auth_service;
pub mod coach_service;
pub mod directory_service;
pub mod holdings_service;
pub mod learn_service;
pub mod lesson_catalog;
pub mod market_service;
pub mod portfolio_service;
pub mod trade_service;
