pub mod lnd;
pub mod traits;

pub use lnd::LndRestClient;
pub use traits::{InvoiceEvent, LedgerClient};
