pub mod handler;
pub mod request;
