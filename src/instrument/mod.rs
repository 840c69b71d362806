//! Instrument session and the three TSP primitives: load, run, read buffer.

pub mod buffer;
pub mod script;
pub mod session;

pub use buffer::{read_buffer, BufferChannel, BufferField, Smu};
pub use script::{load_script, run_script, ScriptDescriptor, ScriptSource};
pub use session::{Session, SessionConfig, SessionState, TransportKind};
