//! Core library for tsp_daq.
//!
//! Automates a TSP-scriptable source-measure unit (Keithley 2636 class) over a
//! serial link: scripts are uploaded to the instrument, run there, and their
//! buffers read back as named numeric columns. A single worker owns the
//! instrument session and runs measurement requests one at a time in the
//! order they were submitted.
//!
//! Layers, bottom up:
//!
//! - [`adapters`]: line-oriented transports (serial, mock)
//! - [`instrument`]: the session and the load/run/read primitives
//! - [`measurement`]: measurement kinds, the script catalogue and the sweep runner
//! - [`actors`] and [`messages`]: the queued sweep worker and its events
//! - [`data`]: result tables and tab-separated persistence
//! - [`config`]: Figment-based settings

pub mod actors;
pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod messages;
