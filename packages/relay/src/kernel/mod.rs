//! Kernel module - relay infrastructure and dependencies.

pub mod clock;
pub mod deps;
pub mod http_transport;
pub mod test_dependencies;
pub mod traits;

pub use clock::SystemClock;
pub use deps::{RelayDeps, TelegramAdapter};
pub use http_transport::ReqwestTransport;
pub use test_dependencies::TestDependencies;
pub use traits::*;
