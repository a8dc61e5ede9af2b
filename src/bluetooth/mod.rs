pub mod decode;
pub mod machine;
pub mod supervisor;
pub mod transport;

pub use supervisor::Supervisor;
pub use transport::BluerTransport;
