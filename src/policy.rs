//! Pure tenant-access decisions. Every REST, WS and stream handler goes
//! through these before revealing data or acting on a device.

use crate::models::{Tenant, TenantScope};

pub fn can_access_tenant(scope: &TenantScope, tenant: Tenant) -> bool {
    match scope {
        TenantScope::All => true,
        TenantScope::Tenants(ts) => ts.contains(&tenant),
    }
}

/// A device with no recorded tenant is invisible to everyone, wildcard
/// admins included.
pub fn can_access_device(scope: &TenantScope, device_tenant: Option<Tenant>) -> bool {
    match device_tenant {
        Some(t) => can_access_tenant(scope, t),
        None => false,
    }
}
