//! In-memory collaborators
//!
//! Every collaborator here is a view over one shared [`MemoryCloud`]:
//!
//! ```
//! use infraproc_memory::{MemoryCloud, MemoryCloudHandler, MemoryInfoBroker};
//!
//! let cloud = MemoryCloud::new();
//! cloud.define_cooked("web", "b1");
//! let handler = MemoryCloudHandler::new(cloud.clone());
//! let broker = MemoryInfoBroker::new(cloud.clone());
//! # let _ = (handler, broker);
//! ```

pub mod backends;
pub mod cloud;

pub use backends::{MemoryCloudHandler, MemoryInfoBroker, MemoryServiceComposer, MemoryStore};
pub use cloud::{Call, FailurePoint, MemoryCloud, MemoryInstance};
