//! # Authentication
//!
//! Bearer-token issuance/verification and password hashing. The HTTP layer
//! and the WebSocket gateway both authenticate through [`TokenSigner`];
//! password verifiers are produced and checked by the `password` module and
//! stored opaquely by the repository.

mod jwt;
mod password;

pub use jwt::{Claims, TokenSigner};
pub use password::{hash_password, verify_password};
