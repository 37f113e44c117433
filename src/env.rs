// Copyright (c) 2024 Contributors to the Eclipse Foundation
//
// See the NOTICE file(s) distributed with this work for additional
// information regarding copyright ownership.
//
// This program and the accompanying materials are made available under the
// terms of the Apache License Version 2.0 which is available at
// https://www.apache.org/licenses/LICENSE-2.0
//
// SPDX-License-Identifier: Apache-2.0

//! Environment variable access (§6 "Environment variables"), routed
//! through a small injectable overlay so `TESTING`-deployment tests can
//! override `MICROBUS_*` values without mutating the process environment
//! directly.

use std::collections::HashMap;
use std::sync::RwLock;

pub const MICROBUS_PLANE: &str = "MICROBUS_PLANE";
pub const MICROBUS_LOCALITY: &str = "MICROBUS_LOCALITY";
pub const MICROBUS_DEPLOYMENT: &str = "MICROBUS_DEPLOYMENT";
pub const MICROBUS_NATS: &str = "MICROBUS_NATS";
pub const MICROBUS_SHORT_CIRCUIT: &str = "MICROBUS_SHORT_CIRCUIT";
pub const MICROBUS_LOG_DEBUG: &str = "MICROBUS_LOG_DEBUG";

static OVERLAY: RwLock<Option<HashMap<String, String>>> = RwLock::new(None);

/// Reads `name`, preferring the test overlay (if installed) over the real
/// process environment.
pub fn get(name: &str) -> Option<String> {
    if let Some(overlay) = OVERLAY.read().expect("env overlay poisoned").as_ref() {
        return overlay.get(name).cloned();
    }
    std::env::var(name).ok()
}

/// Installs an overlay that shadows the process environment for every
/// subsequent [`get`] call. Intended for `TESTING`-deployment unit tests
/// only; a production connector never calls this.
pub fn install_overlay(values: HashMap<String, String>) {
    *OVERLAY.write().expect("env overlay poisoned") = Some(values);
}

pub fn clear_overlay() {
    *OVERLAY.write().expect("env overlay poisoned") = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The overlay is process-global; serialize the tests that touch it.
    static GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn overlay_shadows_real_environment() {
        let _lock = GUARD.lock().unwrap();
        install_overlay(HashMap::from([(MICROBUS_PLANE.to_string(), "test-plane".to_string())]));
        assert_eq!(get(MICROBUS_PLANE), Some("test-plane".to_string()));
        assert_eq!(get("NOT_SET_ANYWHERE"), None);
        clear_overlay();
    }
}
