pub mod tenant;
pub mod tracing;

pub use self::tenant::{TEAM_ID_HEADER, TenantContext, USER_ID_HEADER};
pub use self::tracing::{REQUEST_ID_HEADER, make_request_span, request_id_middleware};
