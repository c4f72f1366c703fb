pub mod bridge;
pub mod completions;
pub mod doctor;
pub mod host;
pub mod send;
