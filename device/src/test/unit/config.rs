use std::collections::HashMap;

use test_case::test_case;

use crate::backend::DeviceKind;
use crate::config::{CatalogConfig, ENV_DEVICE_INDEX, ENV_DEVICE_KIND, ENV_PLATFORM_VENDORS};
use crate::error::Error;
use crate::selection::SelectionPolicy;

fn from_pairs(pairs: &[(&str, &str)]) -> crate::Result<CatalogConfig> {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    CatalogConfig::from_vars(|key| vars.get(key).cloned())
}

#[test]
fn test_defaults_without_variables() {
    let config = from_pairs(&[]).unwrap();
    assert_eq!(config.device_kind, DeviceKind::Gpu);
    assert_eq!(config.device_index, 0);
    assert!(matches!(&config.policy, SelectionPolicy::AllowList(list) if list.tokens() == ["nvidia", "amd"]));
}

#[test]
fn test_vendor_list() {
    let config = from_pairs(&[(ENV_PLATFORM_VENDORS, "Intel, pocl")]).unwrap();
    assert!(matches!(&config.policy, SelectionPolicy::AllowList(list) if list.tokens() == ["intel", "pocl"]));
}

#[test]
fn test_wildcard_vendor_list() {
    let config = from_pairs(&[(ENV_PLATFORM_VENDORS, " * ")]).unwrap();
    assert!(matches!(config.policy, SelectionPolicy::Any));
}

#[test_case("gpu", DeviceKind::Gpu; "gpu")]
#[test_case("CPU", DeviceKind::Cpu; "uppercase cpu")]
#[test_case("acc", DeviceKind::Accelerator; "accelerator short")]
#[test_case(" all ", DeviceKind::All; "padded all")]
fn test_device_kind(value: &str, expected: DeviceKind) {
    assert_eq!(from_pairs(&[(ENV_DEVICE_KIND, value)]).unwrap().device_kind, expected);
}

#[test_case(ENV_PLATFORM_VENDORS, " , "; "empty vendor list")]
#[test_case(ENV_DEVICE_KIND, "fpga"; "unknown device kind")]
#[test_case(ENV_DEVICE_INDEX, "two"; "non numeric index")]
#[test_case(ENV_DEVICE_INDEX, "-1"; "negative index")]
fn test_invalid_values(key: &'static str, value: &str) {
    let err = from_pairs(&[(key, value)]).unwrap_err();
    assert!(matches!(&err, Error::InvalidConfig { key: k, value: v } if *k == key && v == value), "{err}");
}

#[test]
fn test_device_index() {
    assert_eq!(from_pairs(&[(ENV_DEVICE_INDEX, " 2 ")]).unwrap().device_index, 2);
}

#[test]
fn test_builder() {
    let config = CatalogConfig::builder().device_kind(DeviceKind::All).device_index(3).build();
    assert_eq!(config.device_kind, DeviceKind::All);
    assert_eq!(config.device_index, 3);
    assert!(matches!(config.policy, SelectionPolicy::AllowList(_)));
}
