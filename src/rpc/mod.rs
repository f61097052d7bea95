//! RPC layer: batch transport (§4.A), adaptive batch sizing (§4.B), and the
//! rate-limited dispatcher (§4.C).

pub mod dispatcher;
pub mod sizer;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use sizer::BatchSizer;
pub use transport::{BatchCall, BatchElementResult, JsonRpcErrorObj, RpcTransport};
