// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Summary statistics snapshot and interactive controls

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::org_unit::{self, OrgUnit};
use crate::projection::NONE;

pub const CHROMEOS_DEVICES_COUNT: &str = "ChromeOSDevicesCount";
pub const ORGANIZATIONAL_UNITS_COUNT: &str = "OrganizationalUnitsCount";
pub const ORGANIZATIONAL_UNITS_GROUP: &str = "OrganizationalUnits#";

/// The one supported control: selects the current organizational unit
pub const ORG_UNIT_NAME_CONTROL: &str = "OrganizationalUnits#Name";

/// Kind of an interactive control
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlKind {
    DropDown {
        options: Vec<String>,
        labels: Vec<String>,
    },
}

/// An interactive control emitted with the statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvancedControl {
    pub name: String,
    #[serde(flatten)]
    pub kind: ControlKind,
    pub value: String,
}

impl AdvancedControl {
    /// Dropdown whose labels are its options
    pub fn dropdown(name: impl Into<String>, options: Vec<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ControlKind::DropDown {
                labels: options.clone(),
                options,
            },
            value: value.into(),
        }
    }
}

/// One control request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllableProperty {
    pub property: String,
    pub value: String,
}

impl ControllableProperty {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// Statistics snapshot returned to the console
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedStatistics {
    pub statistics: BTreeMap<String, String>,
    pub controls: Vec<AdvancedControl>,
}

impl ExtendedStatistics {
    /// Snapshot for an account whose customer id could not be resolved
    pub fn unavailable() -> Self {
        let mut statistics = BTreeMap::new();
        statistics.insert(CHROMEOS_DEVICES_COUNT.to_string(), NONE.to_string());
        statistics.insert(ORGANIZATIONAL_UNITS_COUNT.to_string(), NONE.to_string());
        Self {
            statistics,
            controls: Vec::new(),
        }
    }

    pub fn control(&self, name: &str) -> Option<&AdvancedControl> {
        self.controls.iter().find(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.statistics.get(name).map(String::as_str)
    }
}

/// Inputs of the summary statistics
#[derive(Debug, Clone, Copy)]
pub struct SummaryInput<'a> {
    pub org_units: &'a [OrgUnit],
    /// Raw device objects of the latest device page
    pub device_page: &'a [Value],
    pub filter: Option<&'a str>,
    pub selected: Option<&'a str>,
    pub default_position: usize,
}

impl<'a> SummaryInput<'a> {
    /// Unit the summary describes, if any
    pub fn current_unit(&self) -> Option<&'a OrgUnit> {
        org_unit::current_unit(self.org_units, self.filter, self.selected, self.default_position)
    }
}

/// Build the summary statistics.
///
/// `parent_name` is the resolved name of the current unit's parent.
pub fn build_summary(input: &SummaryInput<'_>, parent_name: Option<String>) -> ExtendedStatistics {
    let mut out = ExtendedStatistics::default();
    let unit_count = org_unit::count_matching(input.org_units, input.filter);

    out.statistics.insert(
        CHROMEOS_DEVICES_COUNT.to_string(),
        input.device_page.len().to_string(),
    );
    out.statistics
        .insert(ORGANIZATIONAL_UNITS_COUNT.to_string(), unit_count.to_string());
    if unit_count == 0 {
        return out;
    }

    let unit = input.current_unit().cloned().unwrap_or_default();
    let group = |name: &str| format!("{}{}", ORGANIZATIONAL_UNITS_GROUP, name);
    let or_none = |v: Option<&String>| {
        v.filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| NONE.to_string())
    };

    out.statistics
        .insert(group("Description"), or_none(unit.description.as_ref()));
    out.statistics
        .insert(group("UnitID"), or_none(unit.org_unit_id.as_ref()));
    out.statistics
        .insert(group("ParentName"), or_none(parent_name.as_ref()));

    let in_unit = input
        .device_page
        .iter()
        .filter(|d| {
            d.get("orgUnitPath")
                .and_then(Value::as_str)
                .map_or(false, |p| Some(p) == unit.org_unit_path.as_deref())
        })
        .count();
    out.statistics
        .insert(group("ChromeOSDevicesCount"), in_unit.to_string());

    if !unit.name.is_empty() && unit_count > 1 {
        let options = input.org_units.iter().map(|u| u.name.clone()).collect();
        out.controls
            .push(AdvancedControl::dropdown(ORG_UNIT_NAME_CONTROL, options, unit.name.clone()));
        // the control carries the value
        out.statistics
            .insert(ORG_UNIT_NAME_CONTROL.to_string(), String::new());
    } else {
        let name = if unit.name.is_empty() {
            NONE.to_string()
        } else {
            unit.name
        };
        out.statistics.insert(ORG_UNIT_NAME_CONTROL.to_string(), name);
    }

    out
}
