pub mod cron_parser;

pub use cron_parser::CronParser;
