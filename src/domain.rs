pub mod approval;
pub mod audit;
pub mod coupon;
pub mod error;
pub mod id;
pub mod money;
pub mod notification;
pub mod outbox;
pub mod ports;
pub mod pricing;
pub mod provider;
pub mod ticket;
pub mod transaction;
