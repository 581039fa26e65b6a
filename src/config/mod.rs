//! Configuration and path management for Strongbox

pub mod paths;

pub use paths::StrongboxPaths;
