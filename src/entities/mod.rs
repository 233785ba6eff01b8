pub mod order;
pub mod order_status;
pub mod payment;
pub mod product;
pub mod user;
