pub mod policy_io;
pub mod server;
