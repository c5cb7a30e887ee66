pub use recorder::Recorder;
pub use verifier::{FlowVerifier, VerifyError};

mod recorder;
mod verifier;
