//! # 采集组规则
//!
//! 决定样本是否命中某个采集组、适用哪种采集模式，并展开被引用（include）的采集组。
//!
//! ```text
//! 批次样本 ──► resolve(ARCHIVE) ──┐
//!                                  ├──► Selection（按 (device, data item) 去重）
//! 批次样本 ──► resolve(CURRENT) ──┘
//!                 ▲
//!                 └── include 组：从全局最新样本视图补齐
//! ```
//!
//! 去重规则：已选中同键条目的时间戳 ≥ 候选时间戳时跳过候选（相等视为重复，先到者保留）；
//! 候选严格更新时原位替换旧条目，保证同一批次内不出现重复键。

mod catalog;

pub use catalog::{SampleCache, TopologyCatalog};

use domain::{Sample, SampleKey, StreamItem, StreamKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// 采集模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureMode {
    /// 历史归档，发送失败后进入缓冲区。
    Archive,
    /// 最新值快照，永不进入缓冲区。
    Current,
}

impl CaptureMode {
    pub fn stream_kind(self) -> StreamKind {
        match self {
            Self::Archive => StreamKind::ArchivedSample,
            Self::Current => StreamKind::CurrentSample,
        }
    }
}

/// 过滤条件作用的字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterField {
    DeviceId,
    DataItemId,
    DataItemType,
    Category,
    /// 数据项所在的任一上级 component id。
    ComponentId,
    /// 数据项所在的任一上级 component 类型。
    ComponentType,
}

/// 单个过滤条件：字段值等于任一候选值即命中，`*` 命中任意已知值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFilter {
    pub field: FilterField,
    pub values: Vec<String>,
}

impl CaptureFilter {
    pub fn new(field: FilterField, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            field,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, sample: &Sample, catalog: &TopologyCatalog) -> bool {
        match self.field {
            FilterField::DeviceId => self.accepts(Some(&sample.device_id)),
            FilterField::DataItemId => self.accepts(Some(&sample.data_item_id)),
            FilterField::DataItemType => self.accepts(
                catalog
                    .data_item(&sample.device_id, &sample.data_item_id)
                    .map(|item| item.data_item_type.as_str()),
            ),
            FilterField::Category => self.accepts(
                catalog
                    .data_item(&sample.device_id, &sample.data_item_id)
                    .map(|item| item.category.as_str()),
            ),
            FilterField::ComponentId => catalog
                .ancestors(&sample.device_id, &sample.data_item_id)
                .iter()
                .any(|component| self.accepts(Some(&component.id))),
            FilterField::ComponentType => catalog
                .ancestors(&sample.device_id, &sample.data_item_id)
                .iter()
                .any(|component| self.accepts(Some(&component.component_type))),
        }
    }

    fn accepts(&self, candidate: Option<&str>) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        self.values
            .iter()
            .any(|value| value == "*" || value == candidate)
    }
}

/// 采集组配置（运行期不可变）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureGroup {
    pub name: String,
    #[serde(rename = "capture_mode")]
    pub mode: CaptureMode,
    #[serde(default)]
    pub filters: Vec<CaptureFilter>,
    /// 被引用的其他采集组名称。
    #[serde(default)]
    pub include: Vec<String>,
}

impl CaptureGroup {
    pub fn new(name: impl Into<String>, mode: CaptureMode) -> Self {
        Self {
            name: name.into(),
            mode,
            filters: Vec::new(),
            include: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: CaptureFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_include(mut self, group: impl Into<String>) -> Self {
        self.include.push(group.into());
        self
    }

    pub fn check_filters(&self, sample: &Sample, catalog: &TopologyCatalog) -> bool {
        self.filters
            .iter()
            .all(|filter| filter.matches(sample, catalog))
    }
}

/// 样本是否满足采集组的全部过滤条件（无条件的组命中一切样本）。
pub fn check_filters(sample: &Sample, group: &CaptureGroup, catalog: &TopologyCatalog) -> bool {
    group.check_filters(sample, catalog)
}

/// 采集组配置错误。
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("duplicate capture group: {0}")]
    DuplicateGroup(String),
    #[error("capture group {group} includes unknown group {include}")]
    UnknownInclude { group: String, include: String },
    #[error("capture group {0} has a filter without values")]
    EmptyFilter(String),
}

/// 校验采集组名称唯一、include 引用存在。
pub fn validate_groups(groups: &[CaptureGroup]) -> Result<(), CaptureError> {
    let mut names = HashSet::new();
    for group in groups {
        if !names.insert(group.name.as_str()) {
            return Err(CaptureError::DuplicateGroup(group.name.clone()));
        }
        if group.filters.iter().any(|filter| filter.values.is_empty()) {
            return Err(CaptureError::EmptyFilter(group.name.clone()));
        }
    }
    for group in groups {
        for include in &group.include {
            if !names.contains(include.as_str()) {
                return Err(CaptureError::UnknownInclude {
                    group: group.name.clone(),
                    include: include.clone(),
                });
            }
        }
    }
    Ok(())
}

/// resolve 使用的只读全局视图。
#[derive(Debug, Clone, Copy)]
pub struct CaptureContext<'a> {
    pub catalog: &'a TopologyCatalog,
    pub latest: &'a SampleCache,
}

/// 有序去重的选中集合，在 ARCHIVE 与 CURRENT 两轮评估之间共享。
#[derive(Debug, Default)]
pub struct Selection {
    entries: Vec<(Sample, StreamKind)>,
    index: HashMap<SampleKey, usize>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按去重规则插入候选，返回是否被接受。
    pub fn offer(&mut self, sample: &Sample, kind: StreamKind) -> bool {
        let key = sample.key();
        match self.index.get(&key) {
            Some(&position) => {
                let (existing, existing_kind) = &mut self.entries[position];
                if existing.ts_ms >= sample.ts_ms {
                    return false;
                }
                *existing = sample.clone();
                *existing_kind = kind;
                true
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((sample.clone(), kind));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Sample, StreamKind)> {
        self.entries.iter().map(|(sample, kind)| (sample, *kind))
    }

    pub fn into_items(self) -> Vec<StreamItem> {
        self.entries
            .into_iter()
            .map(|(sample, kind)| StreamItem::tagged_sample(sample, kind))
            .collect()
    }
}

/// 评估指定模式的采集组，把命中的样本并入 `selection`，返回被接受的候选数。
///
/// 同一模式内按配置顺序评估。某组命中至少一个批次样本后，
/// 其 include 组从全局最新样本视图补齐，标记为当前组的模式。
pub fn resolve(
    groups: &[CaptureGroup],
    mode: CaptureMode,
    batch: &[Sample],
    context: CaptureContext<'_>,
    selection: &mut Selection,
) -> usize {
    let kind = mode.stream_kind();
    let mut accepted = 0;

    for group in groups.iter().filter(|group| group.mode == mode) {
        let mut matched = false;
        for sample in batch {
            if !group.check_filters(sample, context.catalog) {
                continue;
            }
            matched = true;
            if selection.offer(sample, kind) {
                accepted += 1;
                trace!(
                    target: "relay.capture",
                    group = %group.name,
                    kind = %kind,
                    device_id = %sample.device_id,
                    data_item_id = %sample.data_item_id,
                    ts_ms = sample.ts_ms,
                    value = %sample.value,
                    condition = ?sample.condition,
                    "sample_selected"
                );
            }
        }
        if !matched {
            continue;
        }

        for include in &group.include {
            let Some(included) = groups.iter().find(|candidate| &candidate.name == include) else {
                trace!(target: "relay.capture", group = %group.name, include = %include, "include_missing");
                continue;
            };
            for sample in context.latest.iter() {
                if included.check_filters(sample, context.catalog) && selection.offer(sample, kind) {
                    accepted += 1;
                    trace!(
                        target: "relay.capture",
                        group = %group.name,
                        include = %included.name,
                        kind = %kind,
                        device_id = %sample.device_id,
                        data_item_id = %sample.data_item_id,
                        ts_ms = sample.ts_ms,
                        "included_sample_selected"
                    );
                }
            }
        }
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(data_item_id: &str, ts_ms: i64) -> Sample {
        Sample {
            device_id: "device-1".to_string(),
            data_item_id: data_item_id.to_string(),
            agent_instance_id: 1,
            sequence: ts_ms as u64,
            ts_ms,
            value: format!("v{}", ts_ms),
            condition: None,
        }
    }

    #[test]
    fn selection_keeps_strictly_newest() {
        let mut selection = Selection::new();
        assert!(selection.offer(&sample("D1", 10), StreamKind::ArchivedSample));
        assert!(!selection.offer(&sample("D1", 10), StreamKind::CurrentSample));
        assert!(!selection.offer(&sample("D1", 5), StreamKind::ArchivedSample));
        assert!(selection.offer(&sample("D1", 20), StreamKind::CurrentSample));

        let items: Vec<_> = selection.iter().collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0.ts_ms, 20);
        assert_eq!(items[0].1, StreamKind::CurrentSample);
    }

    #[test]
    fn group_without_filters_matches_everything() {
        let catalog = TopologyCatalog::new();
        let group = CaptureGroup::new("all", CaptureMode::Archive);
        assert!(check_filters(&sample("D9", 1), &group, &catalog));
    }

    #[test]
    fn every_filter_must_match() {
        let catalog = TopologyCatalog::new();
        let group = CaptureGroup::new("g", CaptureMode::Archive)
            .with_filter(CaptureFilter::new(FilterField::DeviceId, ["device-1"]))
            .with_filter(CaptureFilter::new(FilterField::DataItemId, ["D1", "D2"]));
        assert!(group.check_filters(&sample("D2", 1), &catalog));
        assert!(!group.check_filters(&sample("D3", 1), &catalog));
    }

    #[test]
    fn type_filter_needs_known_definition() {
        let catalog = TopologyCatalog::new();
        let group = CaptureGroup::new("g", CaptureMode::Archive)
            .with_filter(CaptureFilter::new(FilterField::DataItemType, ["*"]));
        assert!(!group.check_filters(&sample("D1", 1), &catalog));
    }

    #[test]
    fn validate_rejects_unknown_include() {
        let groups = vec![CaptureGroup::new("g1", CaptureMode::Archive).with_include("missing")];
        assert_eq!(
            validate_groups(&groups),
            Err(CaptureError::UnknownInclude {
                group: "g1".to_string(),
                include: "missing".to_string(),
            })
        );
    }

    #[test]
    fn capture_group_deserializes_from_config() {
        let json = r#"{
            "name": "positions",
            "capture_mode": "CURRENT",
            "filters": [{ "field": "DATA_ITEM_TYPE", "values": ["POSITION"] }],
            "include": ["status"]
        }"#;
        let group: CaptureGroup = serde_json::from_str(json).expect("group");
        assert_eq!(group.mode, CaptureMode::Current);
        assert_eq!(group.filters[0].field, FilterField::DataItemType);
        assert_eq!(group.include, vec!["status".to_string()]);
    }
}
