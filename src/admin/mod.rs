/// Administrative functions
///
/// Activation code issuance and revocation. Admin access itself is an
/// allowlisted email behind an admin session; every mutation lands in the
/// audit log.

pub mod codes;

pub use codes::{ActivationCodeManager, GenerateCodesRequest};
