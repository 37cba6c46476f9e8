pub mod item;
pub mod order;
pub mod order_line;
