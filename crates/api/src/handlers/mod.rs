pub mod runs;
pub mod stages;
