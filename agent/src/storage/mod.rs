pub mod apps;
pub mod settings;
