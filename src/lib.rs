pub mod backup;
pub mod config;
pub mod db;
pub mod models;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod services;
pub mod slots;
pub mod source;
pub mod supabase;
pub mod trend;
