pub mod provider;
pub mod request;
pub mod routing;
pub mod stats;
pub mod template;

pub use provider::*;
pub use request::*;
pub use routing::*;
pub use stats::*;
pub use template::*;
