//! Database clients.
//!
//! [`DatabaseClient`] is the seam between the reconciler and any actual
//! database: one method per mutation, synchronous, fallible. The engine
//! ships two implementations:
//!
//! - [`CallRecorder`] appends every call to an ordered log and optionally
//!   forwards it to a wrapped client. With no wrapped client it is a pure
//!   dry run; with one, the recorded log and the applied calls are the
//!   same thing by construction. The reconciler always talks to a
//!   recorder, which is what keeps it free of dry-run branches.
//! - [`InMemoryDatabase`] applies calls to an owned [`ConfigTree`]
//!   snapshot. It backs the snapshot write mode of the CLI and the
//!   apply step of the reconciliation property tests.

use anyhow::{Result, bail};

use crate::calls::{DbCall, DeviceInfo};
use crate::tree::{AttributeProperties, ConfigTree, Properties};

/// The mutation surface of the configuration database.
pub trait DatabaseClient {
    fn add_device(&mut self, info: &DeviceInfo) -> Result<()>;
    fn delete_device(&mut self, device: &str) -> Result<()>;
    fn put_device_property(&mut self, device: &str, properties: &Properties) -> Result<()>;
    fn delete_device_property(&mut self, device: &str, properties: &Properties) -> Result<()>;
    fn put_device_attribute_property(
        &mut self,
        device: &str,
        attributes: &AttributeProperties,
    ) -> Result<()>;
    fn delete_device_attribute_property(
        &mut self,
        device: &str,
        attributes: &AttributeProperties,
    ) -> Result<()>;
    fn put_class_property(&mut self, class: &str, properties: &Properties) -> Result<()>;
    fn delete_class_property(&mut self, class: &str, properties: &Properties) -> Result<()>;
    fn put_class_attribute_property(
        &mut self,
        class: &str,
        attributes: &AttributeProperties,
    ) -> Result<()>;
    fn delete_class_attribute_property(
        &mut self,
        class: &str,
        attributes: &AttributeProperties,
    ) -> Result<()>;
    fn put_device_alias(&mut self, device: &str, alias: &str) -> Result<()>;
    fn delete_device_alias(&mut self, alias: &str) -> Result<()>;
    fn delete_server(&mut self, server: &str) -> Result<()>;
}

/// Replay one recorded call against a client.
pub fn dispatch(client: &mut dyn DatabaseClient, call: &DbCall) -> Result<()> {
    match call {
        DbCall::AddDevice { info } => client.add_device(info),
        DbCall::DeleteDevice { device } => client.delete_device(device),
        DbCall::PutDeviceProperty { device, properties } => {
            client.put_device_property(device, properties)
        }
        DbCall::DeleteDeviceProperty { device, properties } => {
            client.delete_device_property(device, properties)
        }
        DbCall::PutDeviceAttributeProperty { device, attributes } => {
            client.put_device_attribute_property(device, attributes)
        }
        DbCall::DeleteDeviceAttributeProperty { device, attributes } => {
            client.delete_device_attribute_property(device, attributes)
        }
        DbCall::PutClassProperty { class, properties } => {
            client.put_class_property(class, properties)
        }
        DbCall::DeleteClassProperty { class, properties } => {
            client.delete_class_property(class, properties)
        }
        DbCall::PutClassAttributeProperty { class, attributes } => {
            client.put_class_attribute_property(class, attributes)
        }
        DbCall::DeleteClassAttributeProperty { class, attributes } => {
            client.delete_class_attribute_property(class, attributes)
        }
        DbCall::PutDeviceAlias { device, alias } => client.put_device_alias(device, alias),
        DbCall::DeleteDeviceAlias { alias } => client.delete_device_alias(alias),
        DbCall::DeleteServer { server } => client.delete_server(server),
    }
}

/// A client that records every call, optionally forwarding to a wrapped
/// target. The log keeps calls in issue order.
pub struct CallRecorder<'a> {
    calls: Vec<DbCall>,
    target: Option<&'a mut dyn DatabaseClient>,
}

impl Default for CallRecorder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRecorder<'_> {
    /// A pure dry-run recorder.
    pub fn new() -> Self {
        Self { calls: Vec::new(), target: None }
    }

    /// The recorded calls so far.
    pub fn calls(&self) -> &[DbCall] {
        &self.calls
    }

    /// Consume the recorder, yielding the call log.
    pub fn into_calls(self) -> Vec<DbCall> {
        self.calls
    }
}

impl<'a> CallRecorder<'a> {
    /// A recorder that forwards every call to `target` after logging it.
    pub fn with_target(target: &'a mut dyn DatabaseClient) -> Self {
        Self { calls: Vec::new(), target: Some(target) }
    }

    fn record(&mut self, call: DbCall) -> Result<()> {
        log::debug!("{}: {}", call.method(), serde_json::to_string(&call).unwrap_or_default());
        if let Some(target) = self.target.as_deref_mut() {
            dispatch(target, &call)?;
        }
        self.calls.push(call);
        Ok(())
    }
}

impl DatabaseClient for CallRecorder<'_> {
    fn add_device(&mut self, info: &DeviceInfo) -> Result<()> {
        self.record(DbCall::AddDevice { info: info.clone() })
    }

    fn delete_device(&mut self, device: &str) -> Result<()> {
        self.record(DbCall::DeleteDevice { device: device.to_string() })
    }

    fn put_device_property(&mut self, device: &str, properties: &Properties) -> Result<()> {
        self.record(DbCall::PutDeviceProperty {
            device: device.to_string(),
            properties: properties.clone(),
        })
    }

    fn delete_device_property(&mut self, device: &str, properties: &Properties) -> Result<()> {
        self.record(DbCall::DeleteDeviceProperty {
            device: device.to_string(),
            properties: properties.clone(),
        })
    }

    fn put_device_attribute_property(
        &mut self,
        device: &str,
        attributes: &AttributeProperties,
    ) -> Result<()> {
        self.record(DbCall::PutDeviceAttributeProperty {
            device: device.to_string(),
            attributes: attributes.clone(),
        })
    }

    fn delete_device_attribute_property(
        &mut self,
        device: &str,
        attributes: &AttributeProperties,
    ) -> Result<()> {
        self.record(DbCall::DeleteDeviceAttributeProperty {
            device: device.to_string(),
            attributes: attributes.clone(),
        })
    }

    fn put_class_property(&mut self, class: &str, properties: &Properties) -> Result<()> {
        self.record(DbCall::PutClassProperty {
            class: class.to_string(),
            properties: properties.clone(),
        })
    }

    fn delete_class_property(&mut self, class: &str, properties: &Properties) -> Result<()> {
        self.record(DbCall::DeleteClassProperty {
            class: class.to_string(),
            properties: properties.clone(),
        })
    }

    fn put_class_attribute_property(
        &mut self,
        class: &str,
        attributes: &AttributeProperties,
    ) -> Result<()> {
        self.record(DbCall::PutClassAttributeProperty {
            class: class.to_string(),
            attributes: attributes.clone(),
        })
    }

    fn delete_class_attribute_property(
        &mut self,
        class: &str,
        attributes: &AttributeProperties,
    ) -> Result<()> {
        self.record(DbCall::DeleteClassAttributeProperty {
            class: class.to_string(),
            attributes: attributes.clone(),
        })
    }

    fn put_device_alias(&mut self, device: &str, alias: &str) -> Result<()> {
        self.record(DbCall::PutDeviceAlias {
            device: device.to_string(),
            alias: alias.to_string(),
        })
    }

    fn delete_device_alias(&mut self, alias: &str) -> Result<()> {
        self.record(DbCall::DeleteDeviceAlias { alias: alias.to_string() })
    }

    fn delete_server(&mut self, server: &str) -> Result<()> {
        self.record(DbCall::DeleteServer { server: server.to_string() })
    }
}

/// A database backed by an owned configuration tree.
pub struct InMemoryDatabase {
    tree: ConfigTree,
}

impl InMemoryDatabase {
    pub fn new(tree: ConfigTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    pub fn into_tree(self) -> ConfigTree {
        self.tree
    }

    fn device_mut(&mut self, device: &str) -> Result<&mut crate::tree::DeviceConfig> {
        let Some((server, instance, class)) = self
            .tree
            .devices()
            .find(|(_, _, _, name, _)| name.eq_ignore_ascii_case(device))
            .map(|(s, i, c, _, _)| (s.to_string(), i.to_string(), c.to_string()))
        else {
            bail!("device '{device}' not defined");
        };
        Ok(self.tree.ensure_device(&server, &instance, &class, device))
    }
}

impl DatabaseClient for InMemoryDatabase {
    fn add_device(&mut self, info: &DeviceInfo) -> Result<()> {
        let Some((server, instance)) = info.server.split_once('/') else {
            bail!("malformed server id '{}': expected Server/Instance", info.server);
        };
        // re-registering a device moves it: there is one entry per name
        let previous = self.tree.remove_device(&info.name);
        let node = self.tree.ensure_device(server, instance, &info.class, &info.name);
        if let Some((_, _, _, config)) = previous {
            *node = config;
        }
        Ok(())
    }

    fn delete_device(&mut self, device: &str) -> Result<()> {
        if self.tree.remove_device(device).is_none() {
            bail!("device '{device}' not defined");
        }
        Ok(())
    }

    fn put_device_property(&mut self, device: &str, properties: &Properties) -> Result<()> {
        let bag = self.device_mut(device)?.properties_mut();
        for (name, value) in properties.iter() {
            bag.insert(name, value.clone());
        }
        Ok(())
    }

    fn delete_device_property(&mut self, device: &str, properties: &Properties) -> Result<()> {
        let config = self.device_mut(device)?;
        if let Some(bag) = config.properties.as_mut() {
            for name in properties.keys() {
                bag.remove(name);
            }
            if bag.is_empty() {
                config.properties = None;
            }
        }
        Ok(())
    }

    fn put_device_attribute_property(
        &mut self,
        device: &str,
        attributes: &AttributeProperties,
    ) -> Result<()> {
        let bag = self.device_mut(device)?.attribute_properties_mut();
        for (attribute, props) in attributes.iter() {
            let attr_bag = bag.ensure(attribute);
            for (name, value) in props.iter() {
                attr_bag.insert(name, value.clone());
            }
        }
        Ok(())
    }

    fn delete_device_attribute_property(
        &mut self,
        device: &str,
        attributes: &AttributeProperties,
    ) -> Result<()> {
        let config = self.device_mut(device)?;
        if let Some(bag) = config.attribute_properties.as_mut() {
            for (attribute, props) in attributes.iter() {
                if let Some(attr_bag) = bag.get_mut(attribute) {
                    for name in props.keys() {
                        attr_bag.remove(name);
                    }
                    if attr_bag.is_empty() {
                        bag.remove(attribute);
                    }
                }
            }
            if bag.is_empty() {
                config.attribute_properties = None;
            }
        }
        Ok(())
    }

    fn put_class_property(&mut self, class: &str, properties: &Properties) -> Result<()> {
        let bag = self.tree.ensure_class(class).properties_mut();
        for (name, value) in properties.iter() {
            bag.insert(name, value.clone());
        }
        Ok(())
    }

    fn delete_class_property(&mut self, class: &str, properties: &Properties) -> Result<()> {
        if let Some(config) = self.tree.classes.get_mut(class) {
            if let Some(bag) = config.properties.as_mut() {
                for name in properties.keys() {
                    bag.remove(name);
                }
                if bag.is_empty() {
                    config.properties = None;
                }
            }
        }
        Ok(())
    }

    fn put_class_attribute_property(
        &mut self,
        class: &str,
        attributes: &AttributeProperties,
    ) -> Result<()> {
        let bag = self.tree.ensure_class(class).attribute_properties_mut();
        for (attribute, props) in attributes.iter() {
            let attr_bag = bag.ensure(attribute);
            for (name, value) in props.iter() {
                attr_bag.insert(name, value.clone());
            }
        }
        Ok(())
    }

    fn delete_class_attribute_property(
        &mut self,
        class: &str,
        attributes: &AttributeProperties,
    ) -> Result<()> {
        if let Some(config) = self.tree.classes.get_mut(class) {
            if let Some(bag) = config.attribute_properties.as_mut() {
                for (attribute, props) in attributes.iter() {
                    if let Some(attr_bag) = bag.get_mut(attribute) {
                        for name in props.keys() {
                            attr_bag.remove(name);
                        }
                        if attr_bag.is_empty() {
                            bag.remove(attribute);
                        }
                    }
                }
                if bag.is_empty() {
                    config.attribute_properties = None;
                }
            }
        }
        Ok(())
    }

    fn put_device_alias(&mut self, device: &str, alias: &str) -> Result<()> {
        self.device_mut(device)?.alias = Some(alias.to_string());
        Ok(())
    }

    fn delete_device_alias(&mut self, alias: &str) -> Result<()> {
        let Some(device) = self
            .tree
            .devices()
            .find(|(_, _, _, _, config)| config.alias.as_deref() == Some(alias))
            .map(|(_, _, _, device, _)| device.to_string())
        else {
            bail!("alias '{alias}' not defined");
        };
        self.device_mut(&device)?.alias = None;
        Ok(())
    }

    fn delete_server(&mut self, server: &str) -> Result<()> {
        let Some((name, instance)) = server.split_once('/') else {
            bail!("malformed server id '{server}': expected Server/Instance");
        };
        let name = name.to_string();
        if let Some(instances) = self.tree.servers.get_mut(&name) {
            instances.remove(instance);
            if instances.is_empty() {
                self.tree.servers.remove(&name);
            }
        }
        Ok(())
    }
}
