//! Configuration system

pub mod settings;

pub use settings::{
    ApplicationSettings, ConfigError, InstrumentSettings, ScriptSettings, Settings, SweepSettings,
};
