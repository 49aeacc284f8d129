use indexmap::IndexMap;
use indexmap::map::Entry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GodModeError, Result};

/// Android `View.VISIBLE`.
pub const VISIBLE: i32 = 0;
/// Android `View.GONE`.
pub const GONE: i32 = 8;

/// One view modification recorded by the enforcement agent.
///
/// The agent owns the exact shape. Known fields are typed for convenience and
/// everything else lands in `extra`, so a rule written by a newer agent
/// survives a load/save cycle here untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_version_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_class: Option<String>,
    /// Child indexes walked from the window root down to the view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<Vec<i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "recordTimeStamp", skip_serializing_if = "Option::is_none")]
    pub record_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

macro_rules! overlay_fields {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

impl ViewRule {
    pub fn new(view_class: impl Into<String>, depth: Vec<i32>) -> Self {
        Self {
            view_class: Some(view_class.into()),
            depth: Some(depth),
            ..Self::default()
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visibility = Some(GONE);
        self
    }

    pub fn with_bounds(mut self, x: i32, y: i32, width: i32, height: i32) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_hidden(&self) -> bool {
        self.visibility.is_some_and(|v| v != VISIBLE)
    }

    /// Identity of the targeted view within its screen. Rules with the same
    /// key compete for the same attributes.
    pub fn view_key(&self) -> String {
        if let Some(alias) = &self.alias {
            return format!("alias:{}", alias);
        }
        if let Some(id) = self.id
            && id > 0
        {
            return format!("id:{}", id);
        }
        let path = self
            .depth
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}@{}", self.view_class.as_deref().unwrap_or("?"), path)
    }

    /// Applies every attribute `later` sets on top of `self`.
    pub fn overlay(&mut self, later: &ViewRule) {
        overlay_fields!(
            self,
            later,
            label,
            package_name,
            match_version_code,
            activity_class,
            view_class,
            depth,
            x,
            y,
            width,
            height,
            visibility,
            alias,
            id,
            description,
            record_time,
            image_path,
        );
        for (key, value) in &later.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Rules of one target app, keyed by activity class name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActRules(IndexMap<String, Vec<ViewRule>>);

impl ActRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, activity: &str) -> Option<&Vec<ViewRule>> {
        self.0.get(activity)
    }

    pub fn contains(&self, activity: &str) -> bool {
        self.0.contains_key(activity)
    }

    pub fn activities(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<ViewRule>)> {
        self.0.iter()
    }

    /// Replaces the whole rule list of `activity`. An existing key keeps its
    /// position. Returns the replaced list.
    pub fn insert(
        &mut self,
        activity: impl Into<String>,
        rules: Vec<ViewRule>,
    ) -> Option<Vec<ViewRule>> {
        self.0.insert(activity.into(), rules)
    }

    pub fn push(&mut self, activity: impl Into<String>, rule: ViewRule) {
        self.0.entry(activity.into()).or_default().push(rule);
    }

    pub fn remove(&mut self, activity: &str) -> Option<Vec<ViewRule>> {
        self.0.shift_remove(activity)
    }

    pub fn rule_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Rules of `activity` with later rules overriding earlier ones on the same
    /// view. Views keep the position of their first rule.
    pub fn effective_rules(&self, activity: &str) -> Vec<ViewRule> {
        let Some(rules) = self.0.get(activity) else {
            return Vec::new();
        };

        let mut merged: IndexMap<String, ViewRule> = IndexMap::new();
        for rule in rules {
            match merged.entry(rule.view_key()) {
                Entry::Occupied(mut slot) => slot.get_mut().overlay(rule),
                Entry::Vacant(slot) => {
                    slot.insert(rule.clone());
                }
            }
        }
        merged.into_values().collect()
    }
}

impl FromIterator<(String, Vec<ViewRule>)> for ActRules {
    fn from_iter<T: IntoIterator<Item = (String, Vec<ViewRule>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Counts produced by [`AppRules::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub apps_added: usize,
    pub activities_added: usize,
    pub activities_replaced: usize,
    pub rules_imported: usize,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.activities_added == 0 && self.activities_replaced == 0 && self.apps_added == 0
    }
}

/// The persisted root: target app package name to its activity rules, in the
/// order the apps were first discovered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppRules(IndexMap<String, ActRules>);

impl AppRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, package: &str) -> Option<&ActRules> {
        self.0.get(package)
    }

    pub fn contains(&self, package: &str) -> bool {
        self.0.contains_key(package)
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ActRules)> {
        self.0.iter()
    }

    pub fn rule_count(&self) -> usize {
        self.0.values().map(ActRules::rule_count).sum()
    }

    /// Registers a discovered app. Returns false if it was already known.
    pub fn discover(&mut self, package: impl Into<String>) -> bool {
        match self.0.entry(package.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ActRules::new());
                true
            }
        }
    }

    pub fn insert(&mut self, package: impl Into<String>, rules: ActRules) -> Option<ActRules> {
        self.0.insert(package.into(), rules)
    }

    pub fn push_rule(
        &mut self,
        package: impl Into<String>,
        activity: impl Into<String>,
        rule: ViewRule,
    ) {
        self.0.entry(package.into()).or_default().push(activity, rule);
    }

    pub fn remove_app(&mut self, package: &str) -> Result<ActRules> {
        self.0
            .shift_remove(package)
            .ok_or_else(|| GodModeError::AppNotFound(package.to_string()))
    }

    /// Removes one rule. An activity left without rules is dropped; the app
    /// itself stays listed.
    pub fn remove_rule(&mut self, package: &str, activity: &str, index: usize) -> Result<ViewRule> {
        let act_rules = self
            .0
            .get_mut(package)
            .ok_or_else(|| GodModeError::AppNotFound(package.to_string()))?;
        let rules = act_rules
            .0
            .get_mut(activity)
            .ok_or_else(|| GodModeError::ActivityNotFound {
                package: package.to_string(),
                activity: activity.to_string(),
            })?;
        if index >= rules.len() {
            return Err(GodModeError::RuleNotFound {
                package: package.to_string(),
                activity: activity.to_string(),
                index,
            });
        }
        let removed = rules.remove(index);
        if rules.is_empty() {
            act_rules.remove(activity);
        }
        Ok(removed)
    }

    /// Merges an imported rule set. Every activity present in `imported`
    /// replaces the current list for that activity wholesale; activities and
    /// apps only present here are kept. New keys append in import order.
    pub fn merge(&mut self, imported: AppRules) -> MergeReport {
        let mut report = MergeReport::default();

        for (package, act_rules) in imported.0 {
            let target = match self.0.entry(package) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => {
                    report.apps_added += 1;
                    slot.insert(ActRules::new())
                }
            };

            for (activity, rules) in act_rules.0 {
                report.rules_imported += rules.len();
                if target.insert(activity, rules).is_some() {
                    report.activities_replaced += 1;
                } else {
                    report.activities_added += 1;
                }
            }
        }

        report
    }
}

impl FromIterator<(String, ActRules)> for AppRules {
    fn from_iter<T: IntoIterator<Item = (String, ActRules)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
