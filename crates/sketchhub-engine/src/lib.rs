pub mod gallery;
pub mod memory;
pub mod registry;
pub mod session;
pub mod traits;

pub use gallery::{CanvasCard, GalleryProjector};
pub use memory::InMemoryBackend;
pub use registry::SessionRegistry;
pub use session::{SessionConfig, SessionHandle};
pub use traits::{AccessGuard, DrawingCatalog, SnapshotStore};
