pub mod histogram;
pub mod join;
pub mod table_stats;
