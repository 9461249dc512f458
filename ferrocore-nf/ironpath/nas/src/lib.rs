//! Typed EPS NAS surface for the Ironpath MME.
//!
//! This crate carries the message model the per-UE handler dispatches on:
//! EMM and ESM messages, the outer security-protected framing (including the
//! short Service Request form), protocol configuration options, and the
//! interfaces towards the cryptographic collaborators (EIA/EEA, key
//! derivation). ASN.1-level S1AP encoding and the cipher cores themselves
//! live outside this workspace.

pub mod codec;
pub mod crypto;
pub mod emm;
pub mod esm;
pub mod pco;
pub mod sec;
pub mod types;

pub use codec::NasDecodeError;
pub use emm::{EmmMessage, EmmMsgType};
pub use esm::{EsmFrame, EsmMessage, EsmMsgType};
