// API module
//
// HTTP front end of the node: gossip endpoints used by peers and the
// submission/status endpoints used by a browser form

pub mod handlers;
pub mod routes;
pub mod schema;

// Re-export main components for easier access
pub use routes::configure_routes;
