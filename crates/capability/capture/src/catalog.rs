//! 采集组评估所需的全局视图：拓扑目录与最新样本。

use domain::{ComponentDefinition, DataItemDefinition, Sample, SampleKey, TopologyDefinition};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct DeviceTopology {
    agent_instance_id: Option<u64>,
    components: HashMap<String, ComponentDefinition>,
    data_items: HashMap<String, DataItemDefinition>,
}

impl DeviceTopology {
    /// 新的 agent 实例使此前的定义全部失效。
    fn observe_instance(&mut self, instance_id: u64) {
        if self.agent_instance_id != Some(instance_id) {
            self.components.clear();
            self.data_items.clear();
            self.agent_instance_id = Some(instance_id);
        }
    }
}

/// 按设备索引的 component / data item 定义。
#[derive(Debug, Default)]
pub struct TopologyCatalog {
    devices: HashMap<String, DeviceTopology>,
}

impl TopologyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply<'a>(&mut self, definitions: impl IntoIterator<Item = &'a TopologyDefinition>) {
        for definition in definitions {
            let device = self
                .devices
                .entry(definition.device_id().to_string())
                .or_default();
            match definition {
                TopologyDefinition::Agent(agent) => device.observe_instance(agent.instance_id),
                TopologyDefinition::Device(def) => device.observe_instance(def.agent_instance_id),
                TopologyDefinition::Component(component) => {
                    device.observe_instance(component.agent_instance_id);
                    device
                        .components
                        .insert(component.id.clone(), component.clone());
                }
                TopologyDefinition::DataItem(data_item) => {
                    device.observe_instance(data_item.agent_instance_id);
                    device
                        .data_items
                        .insert(data_item.id.clone(), data_item.clone());
                }
                TopologyDefinition::Connection(_) => {}
            }
        }
    }

    pub fn agent_instance_id(&self, device_id: &str) -> Option<u64> {
        self.devices.get(device_id)?.agent_instance_id
    }

    pub fn data_item(&self, device_id: &str, data_item_id: &str) -> Option<&DataItemDefinition> {
        self.devices.get(device_id)?.data_items.get(data_item_id)
    }

    /// 数据项所在的 component 链（由近及远）。
    pub fn ancestors(&self, device_id: &str, data_item_id: &str) -> Vec<&ComponentDefinition> {
        let mut chain = Vec::new();
        let Some(device) = self.devices.get(device_id) else {
            return chain;
        };
        let Some(data_item) = device.data_items.get(data_item_id) else {
            return chain;
        };
        let mut parent_id = data_item.parent_id.as_str();
        while let Some(component) = device.components.get(parent_id) {
            // 防止异常文档中的环
            if chain.len() > device.components.len() {
                break;
            }
            chain.push(component);
            parent_id = component.parent_id.as_str();
        }
        chain
    }
}

/// 全局最新样本视图（不限于当前批次）。
#[derive(Debug, Default)]
pub struct SampleCache {
    samples: BTreeMap<SampleKey, Sample>,
}

impl SampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<'a>(&mut self, samples: impl IntoIterator<Item = &'a Sample>) {
        for sample in samples {
            let key = sample.key();
            let newer = match self.samples.get(&key) {
                Some(existing) => {
                    sample.ts_ms > existing.ts_ms
                        || (sample.ts_ms == existing.ts_ms && sample.sequence >= existing.sequence)
                }
                None => true,
            };
            if newer {
                self.samples.insert(key, sample.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.values()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
