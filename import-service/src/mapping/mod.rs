pub mod form;
pub mod preview;
pub mod reconciler;
pub mod sessions;

pub use form::{ConfirmedMapping, FieldSlot, FormError, FormState, OverwritePolicy, Provenance};
pub use preview::format_preview;
pub use reconciler::{ApplyOutcome, FieldView, ImportSession, RequestToken, SessionSnapshot};
pub use sessions::ImportSessions;
