mod access;
mod apps;
pub mod config_providers;
mod identity;
mod protocols;
mod resolver;
mod services;
mod session_cache;

pub use access::AccessChecker;
pub use apps::{AppDirectory, ApplicationRecord, ClusterRegistry};
pub use identity::{Identity, IdentitySource};
pub use protocols::ProtocolServer;
pub use resolver::{extract_app_name, AppResolver};
pub use services::Services;
pub use session_cache::{Clock, Session, SessionCache, SystemClock};
