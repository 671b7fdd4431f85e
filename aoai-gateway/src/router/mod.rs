pub mod proxy;
pub mod router;
