pub mod history;
pub mod memory;
