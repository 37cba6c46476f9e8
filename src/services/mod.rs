// Order lifecycle engine and its collaborators
pub mod catalog;
pub mod order_status;
pub mod orders;
pub mod stock_ledger;
