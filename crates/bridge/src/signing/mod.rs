mod correlation;
mod external;
mod recoverable;
mod signature;

pub use correlation::CorrelationTable;
pub use external::{ExternalSigner, HostSigner, SigningResult};
pub use recoverable::{
    LocalKeySigner, address_from_verifying_key, personal_message_digest, recover_address,
};
pub use signature::{RECOVERABLE_SIGNATURE_LEN, SignatureValue, SigningError};
