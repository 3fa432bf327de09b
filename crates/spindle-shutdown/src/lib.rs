pub mod connection;
pub mod coordinator;
pub mod signal;

pub use connection::{ConnectionGuard, ConnectionTracker};
pub use coordinator::{ShutdownCoordinator, ShutdownCoordinatorBuilder, ShutdownPhase, ShutdownReport};
pub use signal::{ShutdownSignal, SignalHandler};
pub use tokio_util::sync::CancellationToken;
