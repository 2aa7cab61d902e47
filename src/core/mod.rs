//! 核心业务逻辑模块

pub mod audit;
pub mod draw;
pub mod inventory;
pub mod lifecycle;
pub mod payment;
pub mod store;
