pub mod server;
pub mod viewer;

pub use server::PortServer;
pub use viewer::{RecentFrames, Viewer, ViewerError, ViewerServer};
