pub mod aggregator;
pub mod bus;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod server;

pub use aggregator::{AggregatorHandle, DeviceAggregator, DeviceTable};
pub use bus::EventBus;
pub use error::{MissingIdentityError, ProtocolError, Result, SpindleError};
pub use handler::{ConnectionHandler, HandleOutcome};
pub use pipeline::{Pipeline, PipelineConfig};
pub use protocol::{decode_line, ACK, NAK};
pub use queue::{report_queue, ReportReceiver, ReportSender};
pub use server::{IngestServer, ServerHandle};
