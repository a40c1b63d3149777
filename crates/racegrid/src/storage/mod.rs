pub mod memory_race;

#[cfg(feature = "sql")]
pub mod sql_race;
