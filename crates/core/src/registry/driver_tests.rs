// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use super::*;

struct StubDriver {
    name: String,
    classes: Vec<String>,
    never_reject: bool,
}

#[async_trait::async_trait]
impl Driver for StubDriver {
    fn name(&self) -> &str {
        &self.name
    }
    fn supported_device_classes(&self) -> &[String] {
        &self.classes
    }
    fn never_reject(&self) -> bool {
        self.never_reject
    }
}

fn stub(name: &str, classes: &[&str], never_reject: bool) -> Arc<dyn Driver> {
    Arc::new(StubDriver {
        name: name.to_owned(),
        classes: classes.iter().map(|s| (*s).to_owned()).collect(),
        never_reject,
    })
}

#[test]
fn register_rejects_empty_name() {
    let registry = DriverRegistry::new();
    let registration = DriverRegistration::new(stub("", &["testClass"], true));
    assert_eq!(registry.register(registration), Err(RegistryError::NullName));
}

#[test]
fn register_rejects_duplicate_name() {
    let registry = DriverRegistry::new();
    registry.register(DriverRegistration::new(stub("a", &["testClass"], true))).unwrap();
    let result = registry.register(DriverRegistration::new(stub("a", &["testClass"], true)));
    assert_eq!(result, Err(RegistryError::DuplicateName));
}

#[test]
fn drivers_for_class_filters_by_supported_classes() {
    let registry = DriverRegistry::new();
    registry.register(DriverRegistration::new(stub("a", &["testClass"], true))).unwrap();
    registry.register(DriverRegistration::new(stub("b", &["otherClass"], true))).unwrap();

    let matched = registry.drivers_for_class("testClass");
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].name(), "a");
}

#[test]
fn names_preserve_insertion_order() {
    let registry = DriverRegistry::new();
    registry.register(DriverRegistration::new(stub("z", &["c1"], true))).unwrap();
    registry.register(DriverRegistration::new(stub("a", &["c1"], true))).unwrap();
    assert_eq!(registry.names(), vec!["z".to_owned(), "a".to_owned()]);
}

#[test]
fn endpoint_profile_version_builder_is_self_scoped() {
    let registration = DriverRegistration::new(stub("a", &["c1"], true))
        .with_endpoint_profile_version("thermostat", 3)
        .with_endpoint_profile_version("lock", 1);
    assert_eq!(registration.expected_profile_version("thermostat"), Some(3));
    assert_eq!(registration.expected_profile_version("lock"), Some(1));
    assert_eq!(registration.expected_profile_version("unknown"), None);
}
