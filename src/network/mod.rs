pub mod secure_connection;
pub mod session;
pub mod traits;

pub use secure_connection::*;
pub use session::*;
pub use traits::*;
