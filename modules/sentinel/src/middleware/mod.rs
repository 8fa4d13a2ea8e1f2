pub mod correlation;
pub mod tenancy;

pub use correlation::{correlation_id_from_extensions, CorrelationId, CORRELATION_ID_HEADER};
pub use tenancy::{is_valid_tenant_id, TenantId, TENANT_ID_HEADER};
