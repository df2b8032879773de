/*!
 * # Permissions Module
 *
 * Permission strings follow the `resource:action` convention. A `resource:*`
 * grant covers every action on that resource.
 */

/// Resource types
pub struct Resources;

impl Resources {
    pub const SERVICE_ORDERS: &'static str = "serviceorders";
    pub const PAYMENTS: &'static str = "payments";
    pub const INVENTORY: &'static str = "inventory";
}

/// Common permission string constants for compile-time safety
pub mod consts {
    pub const SERVICE_ORDERS_READ: &str = "serviceorders:read";
    pub const SERVICE_ORDERS_CREATE: &str = "serviceorders:create";
    pub const SERVICE_ORDERS_UPDATE: &str = "serviceorders:update";
    pub const SERVICE_ORDERS_REPAIR: &str = "serviceorders:repair";
    pub const SERVICE_ORDERS_DELIVER: &str = "serviceorders:deliver";
    pub const SERVICE_ORDERS_CANCEL: &str = "serviceorders:cancel";

    pub const PAYMENTS_CREATE: &str = "payments:create";

    pub const INVENTORY_MANAGE: &str = "inventory:manage";
}

/// True when `granted` covers `required`, honouring `resource:*` wildcards.
pub fn grant_covers(granted: &str, required: &str) -> bool {
    if granted == required {
        return true;
    }
    match (granted.split_once(':'), required.split_once(':')) {
        (Some((g_res, "*")), Some((r_res, _))) => g_res == r_res,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_grants_cover_all_actions_of_a_resource() {
        assert!(grant_covers("serviceorders:*", consts::SERVICE_ORDERS_CANCEL));
        assert!(grant_covers("payments:create", consts::PAYMENTS_CREATE));
        assert!(!grant_covers("payments:*", consts::SERVICE_ORDERS_READ));
        assert!(!grant_covers("serviceorders:read", consts::SERVICE_ORDERS_UPDATE));
    }
}
