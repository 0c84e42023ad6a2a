pub mod backup_scheduler;
pub mod program_table;
