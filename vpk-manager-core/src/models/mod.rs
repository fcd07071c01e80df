pub mod addon;
pub mod conflict;
pub mod settings;
pub mod task;
pub mod workshop;
