// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Interface name filter applied to scan results

use std::collections::BTreeSet;

/// Whether the filter's name set is an allow-list or a deny-list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// Filters scanned fabric interfaces by name
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    mode: FilterMode,
    names: BTreeSet<String>,
}

impl DeviceFilter {
    pub fn new<I, S>(mode: FilterMode, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty name set keeps every device regardless of mode.
    pub fn allows(&self, name: &str) -> bool {
        if self.names.is_empty() {
            return true;
        }
        match self.mode {
            FilterMode::Include => self.names.contains(name),
            FilterMode::Exclude => !self.names.contains(name),
        }
    }
}
