// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Organizational units and current-unit selection
//!
//! Units form a tree through `parent_org_unit_id`, but the tree is never
//! materialized: a parent is resolved by a follow-up fetch when needed.

use serde::{Deserialize, Serialize};

/// An organizational unit of the remote account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrgUnit {
    pub kind: Option<String>,
    pub etag: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub org_unit_path: Option<String>,
    pub org_unit_id: Option<String>,
    pub parent_org_unit_path: Option<String>,
    pub parent_org_unit_id: Option<String>,
}

impl OrgUnit {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            org_unit_path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Name of the current unit.
///
/// Priority: the filter, then the explicit selection, then the unit at
/// `default_position` (the last unit when the list is shorter).
pub fn current_unit_name<'a>(
    units: &'a [OrgUnit],
    filter: Option<&'a str>,
    selected: Option<&'a str>,
    default_position: usize,
) -> Option<&'a str> {
    if let Some(name) = filter.filter(|n| !n.is_empty()) {
        return Some(name);
    }
    if let Some(name) = selected.filter(|n| !n.is_empty()) {
        return Some(name);
    }
    units
        .get(default_position)
        .or_else(|| units.last())
        .map(|u| u.name.as_str())
}

/// The current unit, or `None` when no unit carries the selected name
pub fn current_unit<'a>(
    units: &'a [OrgUnit],
    filter: Option<&str>,
    selected: Option<&str>,
    default_position: usize,
) -> Option<&'a OrgUnit> {
    let name = current_unit_name(units, filter, selected, default_position)?;
    units.iter().find(|u| u.name == name)
}

/// Number of units matching the filter (all units when no filter is set)
pub fn count_matching(units: &[OrgUnit], filter: Option<&str>) -> usize {
    match filter.filter(|n| !n.is_empty()) {
        Some(name) => units.iter().filter(|u| u.name == name).count(),
        None => units.len(),
    }
}
