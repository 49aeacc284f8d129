use std::collections::HashMap;

use serde::Serialize;

use super::{ActRules, AppRules};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IconRef {
    /// The settings app's own icon, used when the package is not installed.
    Default,
    Resource(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub label: String,
    pub icon: Option<String>,
}

/// Looks up installed-app metadata. Resolution is lazy and never persisted.
pub trait AppLabelResolver {
    fn resolve(&self, package: &str) -> Option<AppInfo>;
}

/// Knows no installed apps; every target falls back to its package name.
pub struct PackageNameResolver;

impl AppLabelResolver for PackageNameResolver {
    fn resolve(&self, _package: &str) -> Option<AppInfo> {
        None
    }
}

impl AppLabelResolver for HashMap<String, AppInfo> {
    fn resolve(&self, package: &str) -> Option<AppInfo> {
        self.get(package).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetApp {
    pub package_name: String,
    pub label: String,
    pub icon: IconRef,
    pub activity_count: usize,
    pub rule_count: usize,
}

impl TargetApp {
    pub fn resolve(package: &str, rules: &ActRules, resolver: &dyn AppLabelResolver) -> Self {
        let (label, icon) = match resolver.resolve(package) {
            Some(info) => (
                info.label,
                info.icon.map(IconRef::Resource).unwrap_or(IconRef::Default),
            ),
            None => (package.to_string(), IconRef::Default),
        };

        Self {
            package_name: package.to_string(),
            label,
            icon,
            activity_count: rules.len(),
            rule_count: rules.rule_count(),
        }
    }

    /// Lists every app in discovery order.
    pub fn list(rules: &AppRules, resolver: &dyn AppLabelResolver) -> Vec<Self> {
        rules
            .iter()
            .map(|(package, act_rules)| Self::resolve(package, act_rules, resolver))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ViewRule;

    #[test]
    fn test_unknown_package_falls_back_to_package_name() {
        let mut rules = AppRules::new();
        rules.push_rule("com.example.app", "Main", ViewRule::default());

        let apps = TargetApp::list(&rules, &PackageNameResolver);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].label, "com.example.app");
        assert_eq!(apps[0].icon, IconRef::Default);
        assert_eq!(apps[0].rule_count, 1);
    }

    #[test]
    fn test_resolver_supplies_label_and_icon() {
        let mut rules = AppRules::new();
        rules.discover("com.example.app");

        let mut installed = HashMap::new();
        installed.insert(
            "com.example.app".to_string(),
            AppInfo {
                label: "Example".into(),
                icon: Some("res://example/icon".into()),
            },
        );

        let apps = TargetApp::list(&rules, &installed);
        assert_eq!(apps[0].label, "Example");
        assert_eq!(apps[0].icon, IconRef::Resource("res://example/icon".into()));
        assert_eq!(apps[0].rule_count, 0);
    }
}
