//! Browser host process: owns the DevTools connections, per-agent session
//! state, and the command dispatcher, and serves the bridge over framed
//! stdio.
//!
//! Everything above the [`browser::Browser`] trait is backend-agnostic; the
//! one production backend is [`chrome::CdpBrowser`].

pub mod actions;
pub mod browser;
pub mod cdp;
pub mod chrome;
pub mod dispatch;
pub mod keys;
pub mod runtime;
pub mod session;

pub use browser::{Browser, TabId, TabInfo};
pub use chrome::{ensure_browser, find_browser_binary, CdpBrowser};
pub use dispatch::Dispatcher;
pub use runtime::{run, run_loop};
pub use session::SessionManager;
