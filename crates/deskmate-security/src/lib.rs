pub mod redaction;
pub mod validation;

pub use redaction::{RedactingWriter, redact_secrets};
pub use validation::InputValidator;
