pub mod broker;
pub mod dispatcher;
pub mod store;

pub use broker::{TaskBroker, TaskEnvelope};
pub use dispatcher::TaskDispatcher;
pub use store::{DeadLetterTask, FjallQueue, QueueError};
