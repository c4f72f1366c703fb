pub mod config;
pub mod error;
pub mod paths;
pub mod protocol;

pub use config::{BridgeConfig, BrowserConfig, Config, ScreenshotConfig, SessionConfig};
pub use error::{Error, Result};
pub use paths::Paths;
pub use protocol::{CommandEnvelope, ResponseEnvelope, Status, WsReply, WsRequest};
