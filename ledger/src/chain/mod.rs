//! # Chain Primitives
//!
//! The vocabulary every other module speaks: names, timestamps, and the
//! canonical wire codec.
//!
//! ```text
//! codec.rs: Pack/Unpack traits, VarUint32, container layouts
//! name.rs: 64-bit base32 account/action names
//! time.rs: block slots and second-resolution time points
//! ```

pub mod codec;
pub mod name;
pub mod time;

pub use codec::{CodecError, Pack, Unpack, VarUint32};
pub use name::{Name, NameError};
pub use time::{BlockTimestamp, TimePointSec};
