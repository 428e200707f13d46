//! Transaction handles.
//!
//! A handle gives its owning thread atomic, durable, nested updates to
//! locations in the persistent region:
//! - **Atomicity**: after a crash, every location logged in an unfinished
//!   transaction is restored to its value before the transaction
//! - **Durability**: the outermost `end` flushes every logged location
//! - **Nesting**: inner Begin/End pairs are flattened into the outermost one
//! - **Locks**: locks taken through a handle are released exactly once, at
//!   the outermost `end` or on abort

mod exec;
mod handle;
mod locks;
mod pool;
mod record;

pub use handle::TxHandle;
pub(crate) use pool::HandlePool;
pub use record::Target;
