// Configuration management for jwlmerge

pub mod settings;

pub use settings::Settings;
