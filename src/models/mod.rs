// Domain and wire models
pub mod iap;
pub mod product;
pub mod purchase;
pub mod results;
pub mod transaction;
