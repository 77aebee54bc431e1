//! Database mutation calls.
//!
//! Every change the reconciler wants to make is one [`DbCall`]. The enum
//! replaces the registry API's family of `put_*`/`delete_*` method names
//! with one variant per mutation, so dispatch stays typed end to end.

use serde::Serialize;

use crate::tree::{AttributeProperties, Properties};

/// The registration record for a new device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Full `Server/Instance` identifier
    pub server: String,
    /// Device class
    pub class: String,
    /// Device name (`domain/family/member`)
    pub name: String,
}

/// One database mutation. Serializes with a `method` tag matching the
/// registry API method it corresponds to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DbCall {
    AddDevice {
        info: DeviceInfo,
    },
    DeleteDevice {
        device: String,
    },
    PutDeviceProperty {
        device: String,
        properties: Properties,
    },
    DeleteDeviceProperty {
        device: String,
        /// Removed names with their last-known values
        properties: Properties,
    },
    PutDeviceAttributeProperty {
        device: String,
        attributes: AttributeProperties,
    },
    DeleteDeviceAttributeProperty {
        device: String,
        attributes: AttributeProperties,
    },
    PutClassProperty {
        class: String,
        properties: Properties,
    },
    DeleteClassProperty {
        class: String,
        properties: Properties,
    },
    PutClassAttributeProperty {
        class: String,
        attributes: AttributeProperties,
    },
    DeleteClassAttributeProperty {
        class: String,
        attributes: AttributeProperties,
    },
    PutDeviceAlias {
        device: String,
        alias: String,
    },
    DeleteDeviceAlias {
        alias: String,
    },
    /// Issued only by the empty-server cleanup pass, never by `configure`.
    DeleteServer {
        server: String,
    },
}

impl DbCall {
    /// The registry API method name this call maps to.
    pub fn method(&self) -> &'static str {
        match self {
            Self::AddDevice { .. } => "add_device",
            Self::DeleteDevice { .. } => "delete_device",
            Self::PutDeviceProperty { .. } => "put_device_property",
            Self::DeleteDeviceProperty { .. } => "delete_device_property",
            Self::PutDeviceAttributeProperty { .. } => "put_device_attribute_property",
            Self::DeleteDeviceAttributeProperty { .. } => "delete_device_attribute_property",
            Self::PutClassProperty { .. } => "put_class_property",
            Self::DeleteClassProperty { .. } => "delete_class_property",
            Self::PutClassAttributeProperty { .. } => "put_class_attribute_property",
            Self::DeleteClassAttributeProperty { .. } => "delete_class_attribute_property",
            Self::PutDeviceAlias { .. } => "put_device_alias",
            Self::DeleteDeviceAlias { .. } => "delete_device_alias",
            Self::DeleteServer { .. } => "delete_server",
        }
    }

    /// Whether this call removes something from the database.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::DeleteDevice { .. }
                | Self::DeleteDeviceProperty { .. }
                | Self::DeleteDeviceAttributeProperty { .. }
                | Self::DeleteClassProperty { .. }
                | Self::DeleteClassAttributeProperty { .. }
                | Self::DeleteDeviceAlias { .. }
                | Self::DeleteServer { .. }
        )
    }
}
