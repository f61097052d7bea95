//! On-disk record codec (§3, §4.E): a one-byte format tag plus an RLP-encoded
//! positional field tuple, shared by blocks, transactions, and trace call
//! frames.

pub mod block;
pub mod record;
pub mod trace;
pub mod tx;

pub use block::{decode_block, encode_block, BlockRecord};
pub use record::FORMAT_TAG;
pub use trace::{decode_call_frame, encode_call_frame, CallFrame, CallType};
pub use tx::{decode_tx, encode_tx, tx_num, Log, TxRecord};
