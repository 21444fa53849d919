pub mod cfg;
pub mod codec;
pub mod courier;
pub mod crypto;
pub mod error;
pub mod fabric;
pub mod relay;
pub mod rpc;
pub mod store;
pub mod types;
pub mod view;
