//! Cryptographic building blocks for the envelope engine.
//!
//! Everything in this module is pure, synchronous and free of shared state:
//! each call owns its inputs, draws randomness from an explicitly passed
//! CSPRNG and runs to completion. Concurrent use needs no locking.

pub mod agreement;
pub mod content;
pub mod kdf;
pub mod key_wrap;

pub use agreement::EphemeralKeyPair;
pub use content::ContentAlgorithm;
pub use key_wrap::KeyWrapAlgorithm;
