//! BugBuddy daemon: peer registry, document store and error collection.

pub mod analyzer;
pub mod dispatcher;
pub mod patterns;
pub mod registry;
pub mod server;
pub mod vfs;

pub use analyzer::{Analysis, AnalyzerError, ErrorAnalyzer};
pub use dispatcher::Dispatcher;
pub use patterns::PatternAnalyzer;
pub use registry::{NotifyError, PeerRegistry, RegisteredClient};
pub use server::{Server, IDLE_CHECK_INTERVAL};
pub use vfs::{VfsError, VirtualFile, VirtualFs};
