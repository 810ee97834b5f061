//! Repository layer: ledger and form-store operations over a borrowed connection.
//!
//! Every function takes `&Connection`, so callers can run them inside a
//! `Transaction` (which derefs to `Connection`) and keep reconciliation atomic.

mod form_instance;
mod metadata;

pub use form_instance::*;
pub use metadata::*;
