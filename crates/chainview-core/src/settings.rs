//! Engine settings and the name-keyed accessor table.
//!
//! Settings are read by name from operator tooling; the lookup goes through
//! an explicit enum-keyed table built at compile time rather than runtime
//! introspection, so an unknown name is a typed error.

use serde::{Deserialize, Serialize};

use crate::error::EventDbError;

/// Tunable settings for the read-model engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSettings {
    /// Providers are partitioned into `aggregate_period` buckets; one
    /// bucket is recomputed per round.
    pub aggregate_period: i64,
    /// Providers processed per page within a bucket.
    pub page_limit: i64,
    /// Emit verbose per-page aggregation logs.
    pub debug: bool,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            aggregate_period: 10,
            page_limit: 50,
            debug: false,
        }
    }
}

/// The closed set of readable settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    AggregatePeriod,
    PageLimit,
    Debug,
}

/// A typed setting value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    Int(i64),
    Bool(bool),
}

type Getter = fn(&DbSettings) -> SettingValue;

/// Name → typed getter, one entry per [`Setting`].
const ACCESSORS: &[(Setting, &str, Getter)] = &[
    (Setting::AggregatePeriod, "aggregate_period", |s| {
        SettingValue::Int(s.aggregate_period)
    }),
    (Setting::PageLimit, "page_limit", |s| {
        SettingValue::Int(s.page_limit)
    }),
    (Setting::Debug, "debug", |s| SettingValue::Bool(s.debug)),
];

impl Setting {
    pub fn from_name(name: &str) -> Result<Self, EventDbError> {
        ACCESSORS
            .iter()
            .find(|(_, n, _)| *n == name)
            .map(|(s, _, _)| *s)
            .ok_or_else(|| EventDbError::UnknownSetting(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        ACCESSORS
            .iter()
            .find(|(s, _, _)| s == self)
            .map(|(_, n, _)| *n)
            .expect("every setting has an accessor entry")
    }

    pub fn get(&self, settings: &DbSettings) -> SettingValue {
        let (_, _, getter) = ACCESSORS
            .iter()
            .find(|(s, _, _)| s == self)
            .expect("every setting has an accessor entry");
        getter(settings)
    }
}

impl DbSettings {
    /// Read a setting by name. Unknown names yield
    /// [`EventDbError::UnknownSetting`].
    pub fn get(&self, name: &str) -> Result<SettingValue, EventDbError> {
        Ok(Setting::from_name(name)?.get(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let s = DbSettings::default();
        assert_eq!(s.get("aggregate_period").unwrap(), SettingValue::Int(10));
        assert_eq!(s.get("page_limit").unwrap(), SettingValue::Int(50));
        assert_eq!(s.get("debug").unwrap(), SettingValue::Bool(false));
    }

    #[test]
    fn unknown_name_is_typed_error() {
        let err = DbSettings::default().get("no_such_setting").unwrap_err();
        assert!(matches!(err, EventDbError::UnknownSetting(_)));
    }

    #[test]
    fn name_roundtrip() {
        for (setting, name, _) in ACCESSORS {
            assert_eq!(Setting::from_name(name).unwrap(), *setting);
            assert_eq!(setting.name(), *name);
        }
    }
}
