//! CORS preflight short-circuit (§4.5 step 3): `OPTIONS` with an `Origin`
//! header is answered `204 No Content` without invoking the user handler.

use std::collections::BTreeMap;

pub fn is_cors_preflight(method: &str, headers: &BTreeMap<String, String>) -> bool {
    method.eq_ignore_ascii_case("OPTIONS") && headers.keys().any(|k| k.eq_ignore_ascii_case("Origin"))
}
