//! Client for the Balboa BWA Wi-Fi module.
//!
//! The module speaks a framed binary protocol over TCP port 4257. A
//! [`BwaSession`] owns one connection, keeps the latest status and panel
//! configuration pushed by the spa, and sends control messages.

mod error;
pub mod protocol;
mod session;

pub use error::{Error, Result};
pub use protocol::{HeatMode, PanelConfig, SpaStatus, TempScale, DEFAULT_PORT};
pub use session::BwaSession;
