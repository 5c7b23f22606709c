//! Cryptographic primitives used by the wire protocol

pub mod ecdh;
pub mod tea;

pub use ecdh::EcdhKeyPair;
pub use tea::EMPTY_KEY;
