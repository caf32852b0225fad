pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod llm;
pub mod recovery;
pub mod scheduler;
pub mod summary;
pub mod whitelist;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    pub whitelist: whitelist::Whitelist,
    pub scheduler: std::sync::Arc<scheduler::SummaryScheduler>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
