pub mod factory;

pub use factory::ClientFactory;
