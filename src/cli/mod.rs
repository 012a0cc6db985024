pub mod dashboard;
pub mod list;
pub mod refresh;
pub mod setup;
pub mod ui;
