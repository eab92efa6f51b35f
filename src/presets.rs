//! Built-in filters offered by the CLI picker
//!
//! Presets that fit the structured criteria are expressed as criteria so they
//! go through the query builder; the rest use raw queries.

use crate::models::{AgeThreshold, Category, FilterCriteria, FilterSpec};

/// Section a preset is listed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PresetGroup {
    Attachments,
    Categories,
    Combined,
    Folders,
    ReadStatus,
    StarStatus,
    TimeBased,
}

impl PresetGroup {
    pub fn title(&self) -> &'static str {
        match self {
            PresetGroup::Attachments => "Attachments",
            PresetGroup::Categories => "Categories",
            PresetGroup::Combined => "Combined",
            PresetGroup::Folders => "Folders",
            PresetGroup::ReadStatus => "Read Status",
            PresetGroup::StarStatus => "Star Status",
            PresetGroup::TimeBased => "Time-based",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preset {
    pub key: &'static str,
    pub description: &'static str,
    pub group: PresetGroup,
    pub filter: FilterSpec,
}

fn older_than(age: AgeThreshold) -> FilterSpec {
    FilterSpec::Criteria(FilterCriteria {
        older_than: Some(age),
        ..Default::default()
    })
}

fn category(category: Category) -> FilterSpec {
    FilterSpec::Criteria(FilterCriteria {
        category: Some(category),
        ..Default::default()
    })
}

/// All presets, in display order within their group
pub fn catalog() -> Vec<Preset> {
    use PresetGroup::*;

    let preset = |key: &'static str, description: &'static str, group: PresetGroup, filter: FilterSpec| Preset {
        key,
        description,
        group,
        filter,
    };

    vec![
        preset("old_2y", "Emails older than 2 years", TimeBased, older_than(AgeThreshold::TwoYears)),
        preset("old_1y", "Emails older than 1 year", TimeBased, older_than(AgeThreshold::OneYear)),
        preset("old_6m", "Emails older than 6 months", TimeBased, older_than(AgeThreshold::SixMonths)),
        preset("old_3m", "Emails older than 3 months", TimeBased, older_than(AgeThreshold::ThreeMonths)),
        preset("cat_promotions", "Promotions", Categories, category(Category::Promotions)),
        preset("cat_social", "Social updates", Categories, category(Category::Social)),
        preset("cat_updates", "Updates & notifications", Categories, category(Category::Updates)),
        preset("cat_forums", "Forums", Categories, category(Category::Forums)),
        preset("no_star", "Unstarred emails (excluding important)", StarStatus, FilterSpec::raw("-is:starred -label:Important")),
        preset("read_all", "All read emails", ReadStatus, FilterSpec::raw("is:read")),
        preset("read_old", "Read emails older than 1 year", ReadStatus, FilterSpec::raw("is:read older_than:1y")),
        preset("no_attach", "Emails without attachments", Attachments, FilterSpec::raw("-has:attachment")),
        preset(
            "no_attach_old",
            "Read emails without attachments older than 1 year",
            Attachments,
            FilterSpec::raw("is:read -has:attachment older_than:1y"),
        ),
        preset("trash", "Already in Trash", Folders, FilterSpec::raw("in:trash")),
        preset("spam", "Spam folder", Folders, FilterSpec::raw("in:spam")),
        preset(
            "clean_up",
            "Promotions + Social older than 6 months",
            Combined,
            FilterSpec::raw("(category:promotions OR category:social) older_than:6m"),
        ),
        preset(
            "aggressive",
            "Read, no attachments, older than 1 year, unstarred",
            Combined,
            FilterSpec::raw("is:read -has:attachment older_than:1y -is:starred -label:Important"),
        ),
    ]
}

pub fn find(key: &str) -> Option<Preset> {
    catalog().into_iter().find(|p| p.key.eq_ignore_ascii_case(key.trim()))
}

/// Presets grouped by section, sections in alphabetical order
pub fn grouped() -> Vec<(PresetGroup, Vec<Preset>)> {
    let mut groups: Vec<(PresetGroup, Vec<Preset>)> = Vec::new();
    for preset in catalog() {
        match groups.iter_mut().find(|(g, _)| *g == preset.group) {
            Some((_, presets)) => presets.push(preset),
            None => groups.push((preset.group, vec![preset])),
        }
    }
    groups.sort_by_key(|(group, _)| group.title());
    groups
}
