pub mod conflicts;
pub mod downloads;
pub mod library;
pub mod settings;
pub mod workshop;
