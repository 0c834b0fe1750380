pub mod gateway_client;
pub mod pool;
pub mod worker;

pub use gateway_client::VendorGatewayClient;
pub use pool::DeliveryWorkerPool;
pub use worker::{DeliveryWorker, WorkerContext, WorkerStep};
