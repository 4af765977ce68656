//! Southbound plugin contact
//!
//! Authentication, transport, URL translation and the add-time status check.

pub mod session;
pub mod status;
pub mod translate;
pub mod transport;

pub use session::{PluginReply, PluginSession, SessionContext, SessionRegistry};
pub use status::{check_status, ConnectionMethodVariant, StatusCheck};
pub use translate::UrlTranslator;
pub use transport::{HttpPluginTransport, StatusEndpointProbe};
