pub mod endpoint;
pub mod pool;
pub mod uri;

pub use endpoint::{Endpoint, ModificationTag};
pub use pool::{EndpointIterator, Pool};
pub use uri::Uri;
