//! Typed S1AP surface for UE-associated MME signalling.
//!
//! Carries the procedure-code enumeration, the cause groups, and the PDU
//! structures the per-UE handler consumes and produces. ASN.1 PER encoding
//! happens in the transport layer outside this workspace.

pub mod cause;
pub mod pdu;
pub mod procedure_code;

pub use cause::Cause;
pub use pdu::*;
pub use procedure_code::{ProcedureCode, ProcedureCodeError};
