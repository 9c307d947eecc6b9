pub mod database_config;
pub mod outcome;
pub mod tenant;
