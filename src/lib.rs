pub mod config;
pub mod exception;
pub mod param;
pub mod pool;
pub mod queue;
pub mod request;
pub mod response;
pub mod server;
pub mod store;
pub mod util;

pub use config::{Config, ShutdownMode};
pub use exception::Exception;
pub use param::{HttpRequestMethod, HttpVersion};
pub use pool::{Task, WorkerPool};
pub use queue::TaskQueue;
pub use request::Request;
pub use response::Response;
pub use server::{handle_connection, Context, Server, StopHandle};
pub use store::{InsertOutcome, KvStore, SledStoreBackend, StoreBackend, StoredRecord};
pub use util::HtmlBuilder;
